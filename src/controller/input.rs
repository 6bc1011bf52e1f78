//! # Controller Input Types
//!
//! The capability interface shared by the virtual wheel and external
//! controllers, and the snapshot type every read produces.

#[cfg(test)]
use mockall::automock;

/// Hat position. Each component is -1, 0 or 1.
pub type Hat = (i8, i8);

/// Point-in-time copy of a controller's inputs.
///
/// Axes are in `[-1.0, 1.0]`. A fresh snapshot is produced on every read and
/// never changes afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSnapshot {
    pub axes: Vec<f64>,
    pub buttons: Vec<bool>,
    pub hats: Vec<Hat>,
}

impl InputSnapshot {
    /// Axis value, or `None` if the index is out of range.
    #[must_use]
    pub fn axis(&self, index: usize) -> Option<f64> {
        self.axes.get(index).copied()
    }

    #[must_use]
    pub fn button(&self, index: usize) -> Option<bool> {
        self.buttons.get(index).copied()
    }

    #[must_use]
    pub fn hat(&self, index: usize) -> Option<Hat> {
        self.hats.get(index).copied()
    }

    /// Indices of pressed buttons.
    #[must_use]
    pub fn active_buttons(&self) -> Vec<usize> {
        self.buttons
            .iter()
            .enumerate()
            .filter_map(|(i, &pressed)| pressed.then_some(i))
            .collect()
    }

    /// Hats that are off center, with their indices.
    #[must_use]
    pub fn active_hats(&self) -> Vec<(usize, Hat)> {
        self.hats
            .iter()
            .enumerate()
            .filter(|(_, hat)| hat.0 != 0 || hat.1 != 0)
            .map(|(i, &hat)| (i, hat))
            .collect()
    }
}

/// Static description of a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    pub name: String,
    pub num_axes: usize,
    pub num_buttons: usize,
    pub num_hats: usize,
}

/// Capability-indexed controller read interface.
///
/// Implementations return live values. The provided [`Controller::state`]
/// collects every capability into one snapshot without transforming it.
#[cfg_attr(test, automock)]
pub trait Controller: Send {
    fn name(&self) -> String;

    fn axis_count(&self) -> usize;

    fn button_count(&self) -> usize;

    fn hat_count(&self) -> usize;

    /// Axis value in `[-1.0, 1.0]`.
    fn axis(&self, index: usize) -> f64;

    fn button(&self, index: usize) -> bool;

    fn hat(&self, index: usize) -> Hat;

    /// Called once per poll before reading so event-driven backends can
    /// catch up.
    fn refresh_state(&mut self) {}

    fn info(&self) -> ControllerInfo {
        ControllerInfo {
            name: self.name(),
            num_axes: self.axis_count(),
            num_buttons: self.button_count(),
            num_hats: self.hat_count(),
        }
    }

    fn state(&self) -> InputSnapshot {
        InputSnapshot {
            axes: (0..self.axis_count()).map(|i| self.axis(i)).collect(),
            buttons: (0..self.button_count()).map(|i| self.button(i)).collect(),
            hats: (0..self.hat_count()).map(|i| self.hat(i)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_out_of_range_reads() {
        let snapshot = InputSnapshot::default();
        assert_eq!(snapshot.axis(0), None);
        assert_eq!(snapshot.button(3), None);
        assert_eq!(snapshot.hat(1), None);
    }

    #[test]
    fn test_snapshot_active_inputs() {
        let snapshot = InputSnapshot {
            axes: vec![0.0],
            buttons: vec![false, true, false, true],
            hats: vec![(0, 0), (1, -1)],
        };
        assert_eq!(snapshot.active_buttons(), vec![1, 3]);
        assert_eq!(snapshot.active_hats(), vec![(1, (1, -1))]);
    }

    /// Fixed-value controller for exercising the provided methods.
    struct FixedController;

    impl Controller for FixedController {
        fn name(&self) -> String {
            "G29 Racing Wheel".to_string()
        }
        fn axis_count(&self) -> usize {
            2
        }
        fn button_count(&self) -> usize {
            1
        }
        fn hat_count(&self) -> usize {
            1
        }
        fn axis(&self, index: usize) -> f64 {
            if index == 0 {
                -0.5
            } else {
                0.25
            }
        }
        fn button(&self, _index: usize) -> bool {
            true
        }
        fn hat(&self, _index: usize) -> Hat {
            (0, 1)
        }
    }

    #[test]
    fn test_default_state_reads_every_capability() {
        let state = FixedController.state();
        assert_eq!(state.axes, vec![-0.5, 0.25]);
        assert_eq!(state.buttons, vec![true]);
        assert_eq!(state.hats, vec![(0, 1)]);
    }

    #[test]
    fn test_default_info() {
        let info = FixedController.info();
        assert_eq!(info.name, "G29 Racing Wheel");
        assert_eq!(info.num_axes, 2);
        assert_eq!(info.num_buttons, 1);
        assert_eq!(info.num_hats, 1);
    }
}
