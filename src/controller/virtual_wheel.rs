//! # Virtual Controller
//!
//! On-screen wheel and throttle driven by arrow keys and pointer drags.
//!
//! ## Axes
//!
//! | Axis | Source | Description |
//! |------|--------|-------------|
//! | 0 | Wheel | `sin(wheel angle)` |
//! | 1 | Throttle | `sin(throttle angle)` |
//! | 2 | Brake | `-axis[1]` |
//! | 3 | Clutch | Always 0 |
//!
//! ## Keys
//!
//! Left/Right turn the wheel, Up/Down move the throttle. Holding nothing lets
//! both auto-center toward the nearest full turn.

use super::angle_model::AngleModel;
use super::input::{Controller, Hat, InputSnapshot};

/// Display name of the virtual controller.
pub const VIRTUAL_CONTROLLER_NAME: &str = "Virtual Controller (On-Screen Wheel)";

/// Number of virtual axes (wheel, throttle, brake, clutch).
pub const VIRTUAL_AXES: usize = 4;
/// Number of virtual buttons, always released.
pub const VIRTUAL_BUTTONS: usize = 16;
/// Number of virtual hats, always centered.
pub const VIRTUAL_HATS: usize = 1;

/// Held arrow-key state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrowKeys {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

/// Arrow key identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowKey {
    Left,
    Right,
    Up,
    Down,
}

impl ArrowKeys {
    /// Updates one key's held state.
    pub fn set(&mut self, key: ArrowKey, pressed: bool) {
        match key {
            ArrowKey::Left => self.left = pressed,
            ArrowKey::Right => self.right = pressed,
            ArrowKey::Up => self.up = pressed,
            ArrowKey::Down => self.down = pressed,
        }
    }
}

/// Virtual wheel/throttle controller.
///
/// # Examples
///
/// ```
/// use servo_rig::controller::virtual_wheel::VirtualController;
/// use servo_rig::controller::input::Controller;
///
/// let mut vc = VirtualController::new();
/// vc.update_keys(false, true, false, false); // steer right
///
/// let state = vc.state();
/// assert!(state.axes[0] > 0.0);
/// assert_eq!(state.axes[2], -state.axes[1]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct VirtualController {
    wheel: AngleModel,
    throttle: AngleModel,
    keys: ArrowKeys,
    drag: Option<DragState>,
}

/// Pointer tracking for an in-progress wheel drag.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DragState {
    /// Pointer angle at the previous drag step, `None` before the first step.
    last_pointer: Option<f64>,
}

impl VirtualController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a controller from explicitly configured wheel and throttle models.
    #[must_use]
    pub fn with_models(wheel: AngleModel, throttle: AngleModel) -> Self {
        Self {
            wheel,
            throttle,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn wheel(&self) -> &AngleModel {
        &self.wheel
    }

    pub fn wheel_mut(&mut self) -> &mut AngleModel {
        &mut self.wheel
    }

    #[must_use]
    pub fn throttle(&self) -> &AngleModel {
        &self.throttle
    }

    pub fn throttle_mut(&mut self) -> &mut AngleModel {
        &mut self.throttle
    }

    #[must_use]
    pub fn keys(&self) -> ArrowKeys {
        self.keys
    }

    /// Records a key press or release without ticking.
    pub fn set_key(&mut self, key: ArrowKey, pressed: bool) {
        self.keys.set(key, pressed);
    }

    /// Sets the same key sensitivity on wheel and throttle.
    pub fn set_key_sensitivity(&mut self, sensitivity: f64) {
        self.wheel.set_key_sensitivity(sensitivity);
        self.throttle.set_key_sensitivity(sensitivity);
    }

    /// Sets the same auto-center speed on wheel and throttle.
    pub fn set_auto_center_speed(&mut self, speed: f64) {
        self.wheel.set_auto_center_speed(speed);
        self.throttle.set_auto_center_speed(speed);
    }

    /// Stores the held keys and applies one tick to both axes.
    pub fn update_keys(&mut self, left: bool, right: bool, up: bool, down: bool) {
        self.keys = ArrowKeys {
            left,
            right,
            up,
            down,
        };
        self.tick_held_keys();
    }

    /// Applies one tick of the stored key state.
    ///
    /// While a drag is in progress the wheel is left alone so the pointer and
    /// auto-center never write the same tick. The throttle always ticks.
    pub fn tick_held_keys(&mut self) {
        let keys = self.keys;
        if !self.is_dragging() {
            self.wheel.tick(keys.left, keys.right);
        }
        self.throttle.tick(keys.down, keys.up);
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Starts a drag with the pointer at `pointer_deg`.
    pub fn begin_drag(&mut self, pointer_deg: f64) {
        self.drag = Some(DragState { last_pointer: None });
        self.drag_to(pointer_deg);
    }

    /// Follows the pointer to `pointer_deg` (screen angle around the wheel
    /// center, degrees).
    ///
    /// Each step adds the shortest signed pointer movement to the wheel, so a
    /// pointer circling the center keeps accumulating turns. The first step
    /// aligns the wheel with the pointer via the shortest path from the
    /// current visual position.
    pub fn drag_to(&mut self, pointer_deg: f64) {
        let Some(drag) = self.drag.as_mut() else {
            return;
        };

        let delta = match drag.last_pointer {
            Some(last) => shortest_delta(last, pointer_deg),
            None => shortest_delta(self.wheel.angle().rem_euclid(360.0), pointer_deg),
        };
        drag.last_pointer = Some(pointer_deg);

        let target = self.wheel.angle() + delta;
        self.wheel.set_angle(target);
    }

    /// Ends the drag and lets the wheel auto-center again.
    pub fn end_drag(&mut self) {
        self.drag = None;
    }
}

/// Signed difference `to - from` folded into `(-180, 180]`.
fn shortest_delta(from: f64, to: f64) -> f64 {
    let mut diff = to - from;
    if diff > 180.0 {
        diff -= 360.0;
    } else if diff < -180.0 {
        diff += 360.0;
    }
    diff
}

impl Controller for VirtualController {
    fn name(&self) -> String {
        VIRTUAL_CONTROLLER_NAME.to_string()
    }

    fn axis_count(&self) -> usize {
        VIRTUAL_AXES
    }

    fn button_count(&self) -> usize {
        VIRTUAL_BUTTONS
    }

    fn hat_count(&self) -> usize {
        VIRTUAL_HATS
    }

    fn axis(&self, index: usize) -> f64 {
        match index {
            0 => self.wheel.normalized_axis_value(),
            1 => self.throttle.normalized_axis_value(),
            2 => -self.throttle.normalized_axis_value(),
            _ => 0.0,
        }
    }

    fn button(&self, _index: usize) -> bool {
        false
    }

    fn hat(&self, _index: usize) -> Hat {
        (0, 0)
    }

    fn state(&self) -> InputSnapshot {
        let throttle = self.throttle.normalized_axis_value();
        InputSnapshot {
            axes: vec![self.wheel.normalized_axis_value(), throttle, -throttle, 0.0],
            buttons: vec![false; VIRTUAL_BUTTONS],
            hats: vec![(0, 0); VIRTUAL_HATS],
        }
    }
}
