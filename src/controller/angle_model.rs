//! # Angle Model
//!
//! Continuous-rotation angle state used for the virtual wheel and throttle.
//!
//! The angle accumulates without wraparound so the UI can show how many full
//! turns the wheel has made. An optional symmetric limit clamps it on every
//! write.
//!
//! ## Axis Output
//!
//! The axis value is `sin(radians(angle))`, not `angle / max_angle`. A wheel
//! that keeps spinning sweeps the axis smoothly through `[-1, 1]` once per
//! turn instead of producing a sawtooth, and the same visual position gives
//! the same axis value regardless of the turn count.
//!
//! ```
//! use servo_rig::controller::angle_model::AngleModel;
//!
//! let mut wheel = AngleModel::new();
//! wheel.set_max_angle(0.0); // unlimited
//! wheel.set_angle(390.0);
//!
//! let mut other = AngleModel::new();
//! other.set_angle(30.0);
//!
//! assert!((wheel.normalized_axis_value() - other.normalized_axis_value()).abs() < 1e-9);
//! ```

/// Default arrow-key sensitivity (×180 degrees per tick).
pub const DEFAULT_KEY_SENSITIVITY: f64 = 0.02;
/// Minimum arrow-key sensitivity.
pub const KEY_SENSITIVITY_MIN: f64 = 0.001;
/// Maximum arrow-key sensitivity.
pub const KEY_SENSITIVITY_MAX: f64 = 0.1;

/// Default auto-center speed. Share of the remaining distance kept per tick.
pub const DEFAULT_AUTO_CENTER_SPEED: f64 = 0.95;

/// Default symmetric angle limit in degrees.
pub const DEFAULT_MAX_ANGLE: f64 = 180.0;

/// Below this magnitude auto-center snaps straight to zero.
pub const CENTER_SNAP_DEGREES: f64 = 0.5;

/// Degrees per full turn.
const FULL_TURN: f64 = 360.0;

/// Degrees moved per arrow-key tick at sensitivity 1.0.
const KEY_STEP_SCALE: f64 = 180.0;

/// Unbounded wheel/throttle angle with limiting and auto-centering.
#[derive(Debug, Clone, PartialEq)]
pub struct AngleModel {
    angle: f64,
    max_angle: f64,
    auto_center_speed: f64,
    key_sensitivity: f64,
}

impl Default for AngleModel {
    fn default() -> Self {
        Self::new()
    }
}

impl AngleModel {
    /// Creates a centered model with the default limit, sensitivity and
    /// auto-center speed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            angle: 0.0,
            max_angle: DEFAULT_MAX_ANGLE,
            auto_center_speed: DEFAULT_AUTO_CENTER_SPEED,
            key_sensitivity: DEFAULT_KEY_SENSITIVITY,
        }
    }

    /// Creates a model with explicit settings. Out-of-range values are
    /// clamped the same way the setters clamp them.
    #[must_use]
    pub fn with_settings(max_angle: f64, auto_center_speed: f64, key_sensitivity: f64) -> Self {
        let mut model = Self::new();
        model.set_max_angle(max_angle);
        model.set_auto_center_speed(auto_center_speed);
        model.set_key_sensitivity(key_sensitivity);
        model
    }

    /// Current angle in degrees, including full turns.
    #[must_use]
    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Current limit in degrees. `0.0` means unlimited.
    #[must_use]
    pub fn max_angle(&self) -> f64 {
        self.max_angle
    }

    #[must_use]
    pub fn auto_center_speed(&self) -> f64 {
        self.auto_center_speed
    }

    #[must_use]
    pub fn key_sensitivity(&self) -> f64 {
        self.key_sensitivity
    }

    /// Stores `target`, clamped into `[-max_angle, max_angle]` when a limit
    /// is active.
    ///
    /// # Examples
    ///
    /// ```
    /// use servo_rig::controller::angle_model::AngleModel;
    ///
    /// let mut model = AngleModel::new();
    /// model.set_max_angle(90.0);
    /// model.set_angle(120.0);
    /// assert_eq!(model.angle(), 90.0);
    /// ```
    pub fn set_angle(&mut self, target: f64) {
        self.angle = if self.max_angle > 0.0 {
            target.clamp(-self.max_angle, self.max_angle)
        } else {
            target
        };
    }

    /// Sets the limit (negative values become `0.0`, unlimited) and re-clamps
    /// the stored angle if the new limit is active.
    pub fn set_max_angle(&mut self, limit: f64) {
        self.max_angle = limit.max(0.0);
        if self.max_angle > 0.0 {
            self.set_angle(self.angle);
        }
    }

    /// Sets the auto-center speed, clamped to `[0.0, 1.0]`.
    pub fn set_auto_center_speed(&mut self, speed: f64) {
        self.auto_center_speed = speed.clamp(0.0, 1.0);
    }

    /// Sets the arrow-key sensitivity, clamped to `[0.001, 0.1]`.
    pub fn set_key_sensitivity(&mut self, sensitivity: f64) {
        self.key_sensitivity = sensitivity.clamp(KEY_SENSITIVITY_MIN, KEY_SENSITIVITY_MAX);
    }

    /// Degrees moved by one arrow-key tick.
    #[must_use]
    pub fn key_step(&self) -> f64 {
        self.key_sensitivity * KEY_STEP_SCALE
    }

    /// Applies one tick of directional input.
    ///
    /// Exactly one held direction moves the angle by one key step. With
    /// neither held the angle auto-centers. Holding both leaves it unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use servo_rig::controller::angle_model::AngleModel;
    ///
    /// let mut model = AngleModel::new();
    /// model.tick(false, true);
    /// assert!((model.angle() - 3.6).abs() < 1e-9); // 0.02 * 180
    /// ```
    pub fn tick(&mut self, negative: bool, positive: bool) {
        match (negative, positive) {
            (true, false) => self.set_angle(self.angle - self.key_step()),
            (false, true) => self.set_angle(self.angle + self.key_step()),
            (false, false) => self.auto_center(),
            (true, true) => {}
        }
    }

    /// Moves the angle toward the nearest multiple of 360° by
    /// `(1 - auto_center_speed)` of the remaining distance.
    ///
    /// Within half a degree of zero the angle snaps to exactly `0.0`. A wheel
    /// resting three turns in returns to three turns, not to zero.
    pub fn auto_center(&mut self) {
        if self.angle.abs() > CENTER_SNAP_DEGREES {
            let target = self.nearest_full_turn();
            let diff = target - self.angle;
            self.set_angle(self.angle + diff * (1.0 - self.auto_center_speed));
        } else {
            self.angle = 0.0;
        }
    }

    /// Nearest multiple of 360° to the current angle. Half turns go to the
    /// even multiple, so a wheel resting on a ±180° stop returns to zero.
    #[must_use]
    pub fn nearest_full_turn(&self) -> f64 {
        (self.angle / FULL_TURN).round_ties_even() * FULL_TURN
    }

    /// Axis value in `[-1, 1]`: `sin(radians(angle))`.
    #[must_use]
    pub fn normalized_axis_value(&self) -> f64 {
        self.angle.to_radians().sin()
    }

    /// Whole turns, truncated toward zero.
    #[must_use]
    pub fn rotations(&self) -> i64 {
        (self.angle / FULL_TURN).trunc() as i64
    }

    /// Visual position within the current turn, in `(-180, 180]`.
    #[must_use]
    pub fn display_remainder(&self) -> f64 {
        let remainder = self.angle.rem_euclid(FULL_TURN);
        if remainder > 180.0 {
            remainder - FULL_TURN
        } else {
            remainder
        }
    }
}
