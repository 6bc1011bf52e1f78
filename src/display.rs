//! # Status Text
//!
//! Plain-text renderings of link, wheel and input state for the console.

use std::fmt::Write;

use crate::controller::angle_model::AngleModel;
use crate::controller::input::InputSnapshot;
use crate::mapping::MappingSet;
use crate::serial::protocol::OK_PREFIX;
use crate::serial::{LinkState, LinkStats};

/// Names of the first four axes on a racing wheel
const AXIS_NAMES: [&str; 4] = ["Steering", "Throttle", "Brake", "Clutch"];

/// `Connected: <port> | Commands: N sent, M confirmed (P%)`.
///
/// A link whose handshake never saw READY reads `Connected (unconfirmed): …`.
/// The command section appears once anything has been sent.
#[must_use]
pub fn status_line(stats: &LinkStats) -> String {
    if !stats.is_connected() {
        return "Disconnected".to_string();
    }

    let marker = if stats.state == LinkState::Unconfirmed {
        " (unconfirmed)"
    } else {
        ""
    };
    let mut status = format!(
        "Connected{}: {}",
        marker,
        stats.port.as_deref().unwrap_or("?")
    );
    if let Some(ratio) = stats.confirmation_ratio() {
        let _ = write!(
            status,
            " | Commands: {} sent, {} confirmed ({:.0}%)",
            stats.commands_sent,
            stats.commands_confirmed,
            ratio * 100.0
        );
    }
    status
}

/// Describes the last line the device sent, if any.
#[must_use]
pub fn response_line(stats: &LinkStats) -> Option<String> {
    let last = stats.last_response.as_deref()?;
    Some(if last.starts_with(OK_PREFIX) {
        format!("✓ Last command confirmed: {}", last)
    } else {
        format!("Device: {}", last)
    })
}

/// `-12.5°`, or `+10.0° (+1 rot)` once the wheel has passed a full turn.
#[must_use]
pub fn wheel_label(model: &AngleModel) -> String {
    let remainder = model.display_remainder();
    match model.rotations() {
        0 => format!("{:+.1}°", remainder),
        rotations => format!("{:+.1}° ({:+} rot)", remainder, rotations),
    }
}

/// `Unlimited` for 0, otherwise whole degrees.
#[must_use]
pub fn max_angle_label(max_angle: f64) -> String {
    if max_angle > 0.0 {
        format!("{:.0}°", max_angle)
    } else {
        "Unlimited".to_string()
    }
}

/// Short readout for one axis: steering in degrees, the rest in percent.
#[must_use]
pub fn axis_readout(index: usize, value: f64) -> String {
    if index == 0 {
        format!("{:+.1}°", value * 180.0)
    } else {
        format!("{:.1}%", (value + 1.0) * 50.0)
    }
}

/// Multi-line input report.
///
/// Shows axes 0-2 always and axis 3 only when non-zero, followed by pressed
/// buttons and off-center hats.
#[must_use]
pub fn input_report(snapshot: &InputSnapshot) -> String {
    let mut text = String::from("RACING WHEEL INPUTS:\n");
    text.push_str(&"=".repeat(30));
    text.push_str("\n\n");

    for (i, &value) in snapshot.axes.iter().take(AXIS_NAMES.len()).enumerate() {
        if i > 2 && value.abs() <= 0.001 {
            continue;
        }
        let label = format!("{} (Axis {})", AXIS_NAMES[i], i);
        let _ = writeln!(text, "{:20}: {:7.3} ({})", label, value, axis_readout(i, value));
    }

    let buttons = snapshot.active_buttons();
    if !buttons.is_empty() {
        text.push_str("\nACTIVE BUTTONS:\n");
        for i in buttons {
            let _ = writeln!(text, "  Button {}", i);
        }
    }

    let hats = snapshot.active_hats();
    if !hats.is_empty() {
        text.push_str("\nACTIVE HATS:\n");
        for (i, (x, y)) in hats {
            let _ = writeln!(text, "  Hat {}: ({:+}, {:+})", i, x, y);
        }
    }

    text
}

/// One line per mapping, in servo order.
#[must_use]
pub fn mapping_lines(mappings: &MappingSet) -> Vec<String> {
    mappings
        .iter()
        .map(|m| format!("Servo {} → {} {} ({})", m.servo_id(), m.kind, m.index, m.source))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::aggregator::InputSource;
    use crate::mapping::{InputKind, Mapping};

    fn connected(sent: u64, confirmed: u64) -> LinkStats {
        LinkStats {
            state: LinkState::Ready,
            port: Some("/dev/ttyACM0".to_string()),
            commands_sent: sent,
            commands_confirmed: confirmed,
            ..LinkStats::default()
        }
    }

    #[test]
    fn test_status_disconnected() {
        assert_eq!(status_line(&LinkStats::default()), "Disconnected");
    }

    #[test]
    fn test_status_before_any_command() {
        assert_eq!(status_line(&connected(0, 0)), "Connected: /dev/ttyACM0");
    }

    #[test]
    fn test_status_with_ratio() {
        assert_eq!(
            status_line(&connected(200, 150)),
            "Connected: /dev/ttyACM0 | Commands: 200 sent, 150 confirmed (75%)"
        );
    }

    #[test]
    fn test_status_marks_unconfirmed_link() {
        let mut stats = connected(4, 0);
        stats.state = LinkState::Unconfirmed;

        let unconfirmed = status_line(&stats);
        assert_eq!(
            unconfirmed,
            "Connected (unconfirmed): /dev/ttyACM0 | Commands: 4 sent, 0 confirmed (0%)"
        );
        assert_ne!(unconfirmed, status_line(&connected(4, 0)));
    }

    #[test]
    fn test_response_line() {
        let mut stats = connected(1, 1);
        assert_eq!(response_line(&stats), None);

        stats.last_response = Some("OK:S3:180".to_string());
        assert_eq!(
            response_line(&stats).unwrap(),
            "✓ Last command confirmed: OK:S3:180"
        );

        stats.last_response = Some("Servo 3 attached".to_string());
        assert_eq!(response_line(&stats).unwrap(), "Device: Servo 3 attached");
    }

    #[test]
    fn test_wheel_label_within_first_turn() {
        let mut model = AngleModel::with_settings(0.0, 0.95, 0.02);
        model.set_angle(-12.5);
        assert_eq!(wheel_label(&model), "-12.5°");

        model.set_angle(45.0);
        assert_eq!(wheel_label(&model), "+45.0°");
    }

    #[test]
    fn test_wheel_label_with_rotations() {
        let mut model = AngleModel::with_settings(0.0, 0.95, 0.02);
        model.set_angle(370.0);
        assert_eq!(wheel_label(&model), "+10.0° (+1 rot)");

        model.set_angle(-730.0);
        assert_eq!(wheel_label(&model), "-10.0° (-2 rot)");
    }

    #[test]
    fn test_max_angle_label() {
        assert_eq!(max_angle_label(0.0), "Unlimited");
        assert_eq!(max_angle_label(180.0), "180°");
    }

    #[test]
    fn test_axis_readout() {
        assert_eq!(axis_readout(0, 0.5), "+90.0°");
        assert_eq!(axis_readout(0, -1.0), "-180.0°");
        assert_eq!(axis_readout(1, 0.0), "50.0%");
        assert_eq!(axis_readout(2, -1.0), "0.0%");
    }

    #[test]
    fn test_input_report_sections() {
        let snapshot = InputSnapshot {
            axes: vec![0.0, 1.0, -1.0, 0.0],
            buttons: vec![false, true, false, true],
            hats: vec![(0, 0), (1, -1)],
        };

        let report = input_report(&snapshot);

        assert!(report.contains("Steering (Axis 0)"));
        assert!(report.contains("Brake (Axis 2)"));
        assert!(!report.contains("Clutch"));
        assert!(report.contains("(100.0%)"));
        assert!(report.contains("  Button 1\n  Button 3\n"));
        assert!(report.contains("  Hat 1: (+1, -1)"));
        assert!(!report.contains("Hat 0"));
    }

    #[test]
    fn test_input_report_without_presses() {
        let report = input_report(&InputSnapshot {
            axes: vec![0.0],
            buttons: vec![false],
            hats: vec![(0, 0)],
        });
        assert!(!report.contains("ACTIVE BUTTONS"));
        assert!(!report.contains("ACTIVE HATS"));
    }

    #[test]
    fn test_mapping_lines() {
        let mut set = MappingSet::new();
        set.insert(Mapping::new(4, InputSource::External(1), InputKind::Button, 2).unwrap());
        set.insert(Mapping::new(0, InputSource::Virtual, InputKind::Axis, 0).unwrap());

        let lines = mapping_lines(&set);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Servo 0 → "));
        assert!(lines[1].contains("(Controller 1)"));
    }
}
