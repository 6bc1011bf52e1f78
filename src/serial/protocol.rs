//! # Servo Wire Protocol
//!
//! Line-oriented ASCII protocol spoken by the servo microcontroller.
//!
//! ## Outbound
//!
//! `S<servo_id>:<angle>\n`, e.g. `S3:180\n`. Angle is 0-180.
//!
//! ## Inbound
//!
//! | Line | Meaning |
//! |------|---------|
//! | contains `READY` | Boot complete |
//! | starts with `OK:` | Command confirmation, usually `OK:S<id>:<angle>` |
//! | anything else | Informational |

use bytes::{Buf, BytesMut};

use crate::mapping::clamp_servo_angle;

/// Substring marking a successful microcontroller boot.
pub const READY_TOKEN: &str = "READY";

/// Prefix of a command confirmation line.
pub const OK_PREFIX: &str = "OK:";

/// Baud rates tried during auto-detection, newest/fastest hardware first.
pub const BAUD_CANDIDATES: [u32; 5] = [115_200, 9_600, 57_600, 38_400, 19_200];

/// Classified inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Startup banner containing the READY token.
    Ready,
    /// `OK:` confirmation, with the echoed command when it parses.
    Confirmation(Option<ServoAck>),
    /// Any other text.
    Info,
}

/// Command echoed back in an `OK:S<id>:<angle>` confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoAck {
    pub servo_id: u8,
    pub angle: u8,
}

/// Encodes a servo command, clamping `angle` to 0-180.
///
/// # Examples
///
/// ```
/// use servo_rig::serial::protocol::encode_servo_command;
///
/// assert_eq!(encode_servo_command(3, 200), b"S3:180\n".to_vec());
/// assert_eq!(encode_servo_command(12, 90), b"S12:90\n".to_vec());
/// ```
#[must_use]
pub fn encode_servo_command(servo_id: u8, angle: i32) -> Vec<u8> {
    let angle = clamp_servo_angle(i64::from(angle));
    format!("S{}:{}\n", servo_id, angle).into_bytes()
}

/// Classifies one trimmed inbound line.
#[must_use]
pub fn classify(line: &str) -> Response {
    if let Some(rest) = line.strip_prefix(OK_PREFIX) {
        Response::Confirmation(parse_ack(rest))
    } else if line.contains(READY_TOKEN) {
        Response::Ready
    } else {
        Response::Info
    }
}

/// Parses the `S<id>:<angle>` part of a confirmation.
fn parse_ack(payload: &str) -> Option<ServoAck> {
    let (id, angle) = payload.trim().strip_prefix('S')?.split_once(':')?;
    Some(ServoAck {
        servo_id: id.trim().parse().ok()?,
        angle: angle.trim().parse().ok()?,
    })
}

/// Decodes bytes as UTF-8, dropping invalid sequences instead of failing or
/// substituting replacement characters.
#[must_use]
pub fn decode_permissive(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}

/// Longest partial line kept while waiting for its newline.
pub const MAX_LINE_LEN: usize = 1024;

/// Accumulates raw serial bytes and yields complete newline-terminated lines.
///
/// A partial trailing line stays buffered until its newline arrives. One that
/// grows past [`MAX_LINE_LEN`] is noise and is dropped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);

        let tail = self
            .buf
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        if self.buf.len() - tail > MAX_LINE_LEN {
            self.buf.truncate(tail);
        }
    }

    /// Next complete line, decoded permissively and trimmed. Empty lines are
    /// returned as empty strings.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(newline);
        self.buf.advance(1);
        Some(decode_permissive(&line).trim().to_string())
    }

    /// Drains every complete, non-empty line.
    pub fn drain_lines(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.next_line())
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Bytes waiting for a newline.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_candidate_order() {
        assert_eq!(BAUD_CANDIDATES, [115_200, 9_600, 57_600, 38_400, 19_200]);
    }

    #[test]
    fn test_encode_command() {
        assert_eq!(encode_servo_command(0, 0), b"S0:0\n");
        assert_eq!(encode_servo_command(15, 180), b"S15:180\n");
    }

    #[test]
    fn test_encode_clamps_angle() {
        assert_eq!(encode_servo_command(3, 200), b"S3:180\n");
        assert_eq!(encode_servo_command(3, -5), b"S3:0\n");
    }

    #[test]
    fn test_classify_ready() {
        assert_eq!(classify("READY"), Response::Ready);
        assert_eq!(classify("ESP32-S3 Servo Controller READY"), Response::Ready);
    }

    #[test]
    fn test_classify_confirmation() {
        assert_eq!(
            classify("OK:S3:180"),
            Response::Confirmation(Some(ServoAck {
                servo_id: 3,
                angle: 180
            }))
        );
        assert_eq!(classify("OK:garbled"), Response::Confirmation(None));
    }

    #[test]
    fn test_classify_info() {
        assert_eq!(classify("Servo 3 attached"), Response::Info);
        // OK must be a prefix, not a substring
        assert_eq!(classify("status OK:1"), Response::Info);
    }

    #[test]
    fn test_decode_drops_invalid_bytes() {
        assert_eq!(decode_permissive(b"OK:\xffS1:\xfe90"), "OK:S1:90");
        assert_eq!(decode_permissive("café".as_bytes()), "café");
    }

    #[test]
    fn test_line_buffer_splits_lines() {
        let mut lines = LineBuffer::new();
        lines.extend(b"READY\r\nOK:S1:90\n");
        assert_eq!(lines.drain_lines(), vec!["READY", "OK:S1:90"]);
        assert_eq!(lines.pending(), 0);
    }

    #[test]
    fn test_line_buffer_keeps_partial_tail() {
        let mut lines = LineBuffer::new();
        lines.extend(b"OK:S1:");
        assert!(lines.drain_lines().is_empty());
        assert_eq!(lines.pending(), 6);

        lines.extend(b"90\nOK:S2");
        assert_eq!(lines.drain_lines(), vec!["OK:S1:90"]);
        assert_eq!(lines.pending(), 5);
    }

    #[test]
    fn test_line_buffer_skips_empty_lines() {
        let mut lines = LineBuffer::new();
        lines.extend(b"\n\r\n  \nhello\n");
        assert_eq!(lines.drain_lines(), vec!["hello"]);
    }

    #[test]
    fn test_line_buffer_drops_runaway_partial_line() {
        let mut lines = LineBuffer::new();
        lines.extend(b"OK:S1:90\n");
        lines.extend(&[b'x'; MAX_LINE_LEN + 1]);
        assert_eq!(lines.pending(), 9);

        assert_eq!(lines.drain_lines(), vec!["OK:S1:90"]);
        assert_eq!(lines.pending(), 0);

        lines.extend(&[b'x'; MAX_LINE_LEN]);
        assert_eq!(lines.pending(), MAX_LINE_LEN);
    }
}
