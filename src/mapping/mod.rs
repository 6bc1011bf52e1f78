//! # Servo Mapping Module
//!
//! Binds servos to controller inputs and converts input values to servo
//! angles.
//!
//! ## Conversion
//!
//! | Input | Value | Servo angle |
//! |-------|-------|-------------|
//! | Axis | -1.0 … 1.0 | `round((v + 1) * 90)` → 0 … 180 |
//! | Button | released / pressed | 0 / 90 |
//! | Hat | x ∈ {-1, 0, 1} | 0 / 90 / 180 |
//!
//! An index past the end of the snapshot reads as value 0, so an unmapped
//! axis parks its servo at center rather than failing.
//!
//! ## Usage
//!
//! ```
//! use servo_rig::controller::aggregator::InputSource;
//! use servo_rig::controller::input::InputSnapshot;
//! use servo_rig::mapping::{evaluate, InputKind, Mapping};
//!
//! let mapping = Mapping::new(3, InputSource::Virtual, InputKind::Axis, 0).unwrap();
//! let snapshot = InputSnapshot { axes: vec![1.0], ..Default::default() };
//! assert_eq!(evaluate(&mapping, Some(&snapshot)), 180);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::controller::aggregator::InputSource;
use crate::controller::input::InputSnapshot;
use crate::error::{Result, ServoRigError};

/// Highest addressable servo id.
pub const MAX_SERVO_ID: u8 = 15;

/// Servo angle range in degrees.
pub const SERVO_ANGLE_MIN: u8 = 0;
pub const SERVO_ANGLE_MAX: u8 = 180;
/// Center servo angle.
pub const SERVO_ANGLE_CENTER: u8 = 90;

/// Kind of controller input a mapping reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Axis,
    Button,
    Hat,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputKind::Axis => "axis",
            InputKind::Button => "button",
            InputKind::Hat => "hat",
        };
        f.write_str(name)
    }
}

impl FromStr for InputKind {
    type Err = ServoRigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "axis" => Ok(InputKind::Axis),
            "button" => Ok(InputKind::Button),
            "hat" => Ok(InputKind::Hat),
            other => Err(ServoRigError::InvalidMapping(format!(
                "unknown input type '{}' (expected axis, button or hat)",
                other
            ))),
        }
    }
}

/// One servo → input binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    servo_id: u8,
    pub source: InputSource,
    pub kind: InputKind,
    pub index: usize,
}

impl Mapping {
    /// Creates a mapping, rejecting servo ids above [`MAX_SERVO_ID`].
    pub fn new(servo_id: u8, source: InputSource, kind: InputKind, index: usize) -> Result<Self> {
        if servo_id > MAX_SERVO_ID {
            return Err(ServoRigError::InvalidMapping(format!(
                "servo id {} is out of range (must be 0-{})",
                servo_id, MAX_SERVO_ID
            )));
        }
        Ok(Self {
            servo_id,
            source,
            kind,
            index,
        })
    }

    #[must_use]
    pub fn servo_id(&self) -> u8 {
        self.servo_id
    }
}

/// Raw text fields for a mapping, as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRequest<'a> {
    pub servo_id: &'a str,
    pub kind: &'a str,
    pub index: &'a str,
    pub source: InputSource,
}

impl MappingRequest<'_> {
    /// Validates the text fields into a [`Mapping`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidMapping` for a non-numeric or out-of-range servo id, a
    /// non-numeric index, or an unknown input kind.
    pub fn parse(&self) -> Result<Mapping> {
        let servo_id: u8 = self.servo_id.trim().parse().map_err(|_| {
            ServoRigError::InvalidMapping(format!("servo id '{}' is not a number", self.servo_id))
        })?;
        let kind: InputKind = self.kind.parse()?;
        let index: usize = self.index.trim().parse().map_err(|_| {
            ServoRigError::InvalidMapping(format!("input index '{}' is not a number", self.index))
        })?;
        Mapping::new(servo_id, self.source, kind, index)
    }
}

/// Mappings keyed by servo id. At most one mapping per servo.
///
/// Shared between the command handlers and the poll loop as an immutable
/// snapshot: writers clone, edit, and publish a new set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingSet {
    mappings: BTreeMap<u8, Mapping>,
}

impl MappingSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `mapping`, replacing and returning any previous mapping for the
    /// same servo.
    pub fn insert(&mut self, mapping: Mapping) -> Option<Mapping> {
        self.mappings.insert(mapping.servo_id, mapping)
    }

    pub fn remove(&mut self, servo_id: u8) -> Option<Mapping> {
        self.mappings.remove(&servo_id)
    }

    #[must_use]
    pub fn get(&self, servo_id: u8) -> Option<&Mapping> {
        self.mappings.get(&servo_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Mappings in ascending servo id order.
    pub fn iter(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.values()
    }

    /// Distinct sources referenced by the set.
    #[must_use]
    pub fn sources(&self) -> Vec<InputSource> {
        let mut sources: Vec<InputSource> = self.iter().map(|m| m.source).collect();
        sources.sort();
        sources.dedup();
        sources
    }
}

/// Reads the pre-conversion value a mapping points at.
///
/// Axis values pass through, buttons read as 0/1 and hats as their X
/// component. Missing snapshots and out-of-range indices read as 0.
#[must_use]
pub fn raw_value(mapping: &Mapping, snapshot: Option<&InputSnapshot>) -> f64 {
    let Some(snapshot) = snapshot else {
        return 0.0;
    };

    match mapping.kind {
        InputKind::Axis => snapshot.axis(mapping.index).unwrap_or(0.0),
        InputKind::Button => match snapshot.button(mapping.index) {
            Some(true) => 1.0,
            _ => 0.0,
        },
        InputKind::Hat => snapshot
            .hat(mapping.index)
            .map(|(x, _)| f64::from(x))
            .unwrap_or(0.0),
    }
}

/// Converts the mapped input to a servo angle in `[0, 180]`.
#[must_use]
pub fn evaluate(mapping: &Mapping, snapshot: Option<&InputSnapshot>) -> u8 {
    let value = raw_value(mapping, snapshot);
    let angle = match mapping.kind {
        InputKind::Axis | InputKind::Hat => scale_to_servo(value),
        InputKind::Button => {
            if value > 0.0 {
                i64::from(SERVO_ANGLE_CENTER)
            } else {
                i64::from(SERVO_ANGLE_MIN)
            }
        }
    };
    clamp_servo_angle(angle)
}

/// Servo command produced from one mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoOutput {
    pub servo_id: u8,
    pub angle: u8,
    pub source: InputSource,
}

/// Evaluates every mapping, reading each source's snapshot through `read`.
///
/// `read` is called once per distinct source.
pub fn evaluate_all<F>(mappings: &MappingSet, mut read: F) -> Vec<ServoOutput>
where
    F: FnMut(InputSource) -> Option<InputSnapshot>,
{
    let snapshots: BTreeMap<InputSource, Option<InputSnapshot>> = mappings
        .sources()
        .into_iter()
        .map(|source| (source, read(source)))
        .collect();

    mappings
        .iter()
        .map(|mapping| {
            let snapshot = snapshots.get(&mapping.source).and_then(Option::as_ref);
            ServoOutput {
                servo_id: mapping.servo_id,
                angle: evaluate(mapping, snapshot),
                source: mapping.source,
            }
        })
        .collect()
}

/// Scales `[-1, 1]` to `[0, 180]` with rounding.
#[inline]
fn scale_to_servo(value: f64) -> i64 {
    ((value + 1.0) * 90.0).round() as i64
}

/// Clamps any integer angle into the servo range.
#[inline]
#[must_use]
pub fn clamp_servo_angle(angle: i64) -> u8 {
    angle.clamp(i64::from(SERVO_ANGLE_MIN), i64::from(SERVO_ANGLE_MAX)) as u8
}
