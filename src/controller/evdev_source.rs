//! # evdev Controller Backend
//!
//! Reads steering wheels, pedals and gamepads through the Linux evdev
//! interface and exposes them as capability-indexed [`Controller`]s.
//!
//! ## Capability Layout
//!
//! - Axes: every absolute axis except hats, ordered by event code
//! - Buttons: every key code at or above `BTN_MISC`, ordered by event code
//! - Hats: `ABS_HAT0X/Y` through `ABS_HAT3X/Y`, one hat per supported pair
//!
//! Absolute axes are normalized from their reported `[minimum, maximum]`
//! range to `[-1.0, 1.0]`. Hat Y is inverted so that up is `+1`.

use evdev::{Device, Key};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::aggregator::ControllerDiscovery;
use super::input::{Controller, Hat};
use crate::error::{Result, ServoRigError};

/// Directory scanned for `event*` nodes
const INPUT_DIR: &str = "/dev/input";

/// First absolute axis code used for hats (`ABS_HAT0X`)
const ABS_HAT0X: u16 = 0x10;

/// Last absolute axis code used for hats (`ABS_HAT3Y`)
const ABS_HAT3Y: u16 = 0x17;

/// First multi-touch axis code. Touch surfaces are not controllers.
const ABS_MT_FIRST: u16 = 0x2f;

/// Start of the button key code range (`BTN_MISC`)
const BTN_MISC: u16 = 0x100;

/// Joystick and gamepad button ranges. A device needs an absolute axis and at
/// least one of these buttons to be treated as a controller.
const JOYSTICK_BUTTONS: [std::ops::RangeInclusive<u16>; 3] =
    [0x120..=0x12f, 0x130..=0x13e, 0x2c0..=0x2e7];

/// Maps a raw absolute axis reading into `[-1.0, 1.0]`.
///
/// Degenerate ranges (`maximum <= minimum`) read as centered.
#[must_use]
pub fn normalize_axis(value: i32, minimum: i32, maximum: i32) -> f64 {
    if maximum <= minimum {
        return 0.0;
    }
    let span = f64::from(maximum) - f64::from(minimum);
    let scaled = 2.0 * (f64::from(value) - f64::from(minimum)) / span - 1.0;
    scaled.clamp(-1.0, 1.0)
}

/// Collapses a raw hat reading to -1, 0 or 1.
#[must_use]
pub fn hat_component(value: i32) -> i8 {
    match value.signum() {
        -1 => -1,
        1 => 1,
        _ => 0,
    }
}

/// Whether an absolute axis code is one of the hat axes.
#[must_use]
pub fn is_hat_axis(code: u16) -> bool {
    (ABS_HAT0X..=ABS_HAT3Y).contains(&code)
}

/// Which capability codes a device reports, sorted by event code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityLayout {
    /// Non-hat absolute axis codes
    pub axes: Vec<u16>,
    /// Button key codes
    pub buttons: Vec<u16>,
    /// Hat index (0-3) for each hat present
    pub hats: Vec<u16>,
}

impl CapabilityLayout {
    /// Builds the layout from raw supported codes.
    #[must_use]
    pub fn from_codes(abs_codes: &[u16], key_codes: &[u16]) -> Self {
        let mut axes: Vec<u16> = abs_codes
            .iter()
            .copied()
            .filter(|&code| !is_hat_axis(code) && code < ABS_MT_FIRST)
            .collect();
        axes.sort_unstable();
        axes.dedup();

        let mut buttons: Vec<u16> = key_codes
            .iter()
            .copied()
            .filter(|&code| code >= BTN_MISC)
            .collect();
        buttons.sort_unstable();
        buttons.dedup();

        let hats = (0..4u16)
            .filter(|hat| {
                let x = ABS_HAT0X + hat * 2;
                abs_codes.contains(&x) || abs_codes.contains(&(x + 1))
            })
            .collect();

        Self {
            axes,
            buttons,
            hats,
        }
    }

    /// Whether the device looks like a joystick, wheel or gamepad.
    #[must_use]
    pub fn is_controller(&self) -> bool {
        !self.axes.is_empty()
            && self
                .buttons
                .iter()
                .any(|code| JOYSTICK_BUTTONS.iter().any(|range| range.contains(code)))
    }
}

/// Axis calibration and last reading
#[derive(Debug, Clone, Copy, Default)]
struct AxisReading {
    value: i32,
    minimum: i32,
    maximum: i32,
}

/// External controller opened through evdev
///
/// State is read on [`Controller::refresh_state`] and cached, so capability
/// reads between refreshes are consistent.
pub struct EvdevController {
    device: Device,
    device_path: PathBuf,
    name: String,
    layout: CapabilityLayout,
    axes: Vec<AxisReading>,
    buttons: Vec<bool>,
    hats: Vec<Hat>,
}

impl EvdevController {
    /// Opens one evdev node.
    ///
    /// # Errors
    ///
    /// - `Io`: the node cannot be opened (often a permissions problem)
    /// - `Controller`: the device is not a joystick, wheel or gamepad
    pub fn open(path: &Path) -> Result<Self> {
        let device = Device::open(path)?;

        let abs_codes: Vec<u16> = device
            .supported_absolute_axes()
            .map(|axes| axes.iter().map(|axis| axis.0).collect())
            .unwrap_or_default();
        let key_codes: Vec<u16> = device
            .supported_keys()
            .map(|keys| keys.iter().map(|key| key.code()).collect())
            .unwrap_or_default();

        let layout = CapabilityLayout::from_codes(&abs_codes, &key_codes);
        if !layout.is_controller() {
            return Err(ServoRigError::Controller(format!(
                "{} is not a game controller",
                path.display()
            )));
        }

        let name = device
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| path.display().to_string());

        let mut controller = Self {
            axes: vec![AxisReading::default(); layout.axes.len()],
            buttons: vec![false; layout.buttons.len()],
            hats: vec![(0, 0); layout.hats.len()],
            device,
            device_path: path.to_path_buf(),
            name,
            layout,
        };
        controller.read_state()?;
        Ok(controller)
    }

    fn read_state(&mut self) -> Result<()> {
        let abs = self
            .device
            .get_abs_state()
            .map_err(|e| ServoRigError::Controller(format!("Failed to read axes: {}", e)))?;

        for (reading, &code) in self.axes.iter_mut().zip(&self.layout.axes) {
            if let Some(info) = abs.get(usize::from(code)) {
                *reading = AxisReading {
                    value: info.value,
                    minimum: info.minimum,
                    maximum: info.maximum,
                };
            }
        }

        for (hat, &index) in self.hats.iter_mut().zip(&self.layout.hats) {
            let x = usize::from(ABS_HAT0X + index * 2);
            let x_value = abs.get(x).map_or(0, |info| info.value);
            let y_value = abs.get(x + 1).map_or(0, |info| info.value);
            *hat = (hat_component(x_value), -hat_component(y_value));
        }

        let keys = self
            .device
            .get_key_state()
            .map_err(|e| ServoRigError::Controller(format!("Failed to read buttons: {}", e)))?;
        for (pressed, &code) in self.buttons.iter_mut().zip(&self.layout.buttons) {
            *pressed = keys.contains(Key::new(code));
        }

        Ok(())
    }
}

impl Controller for EvdevController {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn axis_count(&self) -> usize {
        self.axes.len()
    }

    fn button_count(&self) -> usize {
        self.buttons.len()
    }

    fn hat_count(&self) -> usize {
        self.hats.len()
    }

    fn axis(&self, index: usize) -> f64 {
        self.axes
            .get(index)
            .map_or(0.0, |r| normalize_axis(r.value, r.minimum, r.maximum))
    }

    fn button(&self, index: usize) -> bool {
        self.buttons.get(index).copied().unwrap_or(false)
    }

    fn hat(&self, index: usize) -> Hat {
        self.hats.get(index).copied().unwrap_or((0, 0))
    }

    fn refresh_state(&mut self) {
        // A failed read keeps the previous values; a vanished device shows up
        // on the next discovery refresh.
        if let Err(e) = self.read_state() {
            debug!("{}: {}", self.device_path.display(), e);
        }
    }
}

/// Scans `/dev/input` for game controllers
#[derive(Debug, Clone)]
pub struct EvdevDiscovery {
    input_dir: PathBuf,
}

impl Default for EvdevDiscovery {
    fn default() -> Self {
        Self::new(INPUT_DIR)
    }
}

impl EvdevDiscovery {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
        }
    }

    /// Sorted `event*` node paths in the input directory.
    ///
    /// # Errors
    ///
    /// Returns `Controller` if the directory is missing or unreadable.
    pub fn event_nodes(&self) -> Result<Vec<PathBuf>> {
        if !self.input_dir.exists() {
            return Err(ServoRigError::Controller(format!(
                "{} directory not found",
                self.input_dir.display()
            )));
        }

        let mut nodes: Vec<PathBuf> = std::fs::read_dir(&self.input_dir)
            .map_err(|e| {
                ServoRigError::Controller(format!(
                    "Failed to read {}: {}",
                    self.input_dir.display(),
                    e
                ))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with("event"))
            })
            .collect();

        // Numeric order so event10 sorts after event9
        nodes.sort_by_key(|path| {
            let number = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.trim_start_matches("event").parse::<u32>().ok())
                .unwrap_or(u32::MAX);
            (number, path.clone())
        });
        Ok(nodes)
    }
}

impl ControllerDiscovery for EvdevDiscovery {
    fn discover(&mut self) -> Result<Vec<Box<dyn Controller>>> {
        let mut found: Vec<Box<dyn Controller>> = Vec::new();
        for path in self.event_nodes()? {
            match EvdevController::open(&path) {
                Ok(controller) => {
                    info!(
                        "Found controller at {}: {} ({} axes, {} buttons, {} hats)",
                        path.display(),
                        controller.name,
                        controller.axis_count(),
                        controller.button_count(),
                        controller.hat_count()
                    );
                    found.push(Box::new(controller));
                }
                // Permission denied, keyboards, mice - skip
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(found)
    }
}
