//! # Input Aggregator
//!
//! Puts the virtual controller and any external controllers behind one read
//! interface, addressed by an explicit [`InputSource`].
//!
//! External controllers are indexed densely from 0 each time
//! [`InputAggregator::refresh`] runs. An index is not a stable identity: after
//! a disconnect/reconnect the same device may land at a different index, and
//! mappings that name the old index silently follow whatever is there now.

use std::fmt;

use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use super::input::{Controller, ControllerInfo, InputSnapshot};
use super::virtual_wheel::VirtualController;
use crate::error::Result;

/// Which controller a read or mapping refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum InputSource {
    /// The on-screen virtual wheel.
    #[default]
    Virtual,
    /// External controller by refresh index.
    External(usize),
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Virtual => write!(f, "Virtual Controller"),
            InputSource::External(index) => write!(f, "Controller {}", index),
        }
    }
}

/// Finds the external controllers currently attached to the host.
#[cfg_attr(test, automock)]
pub trait ControllerDiscovery: Send {
    /// Opens every usable controller, in a deterministic order.
    fn discover(&mut self) -> Result<Vec<Box<dyn Controller>>>;
}

/// Discovery backend for hosts without external controller support.
#[derive(Debug, Default)]
pub struct NoDiscovery;

impl ControllerDiscovery for NoDiscovery {
    fn discover(&mut self) -> Result<Vec<Box<dyn Controller>>> {
        Ok(Vec::new())
    }
}

/// Owns the virtual controller and the list of external controllers.
pub struct InputAggregator {
    virtual_controller: VirtualController,
    external: Vec<Box<dyn Controller>>,
    discovery: Box<dyn ControllerDiscovery>,
}

impl fmt::Debug for InputAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputAggregator")
            .field("virtual_controller", &self.virtual_controller)
            .field("external", &self.external.len())
            .finish_non_exhaustive()
    }
}

impl InputAggregator {
    /// Creates an aggregator with no external controllers yet. Call
    /// [`InputAggregator::refresh`] to populate them.
    #[must_use]
    pub fn new(virtual_controller: VirtualController, discovery: Box<dyn ControllerDiscovery>) -> Self {
        Self {
            virtual_controller,
            external: Vec::new(),
            discovery,
        }
    }

    /// Re-enumerates external controllers and returns how many were found.
    ///
    /// Discovery failure leaves the aggregator with no external controllers;
    /// the virtual controller is always available.
    pub fn refresh(&mut self) -> usize {
        self.external = match self.discovery.discover() {
            Ok(found) => found,
            Err(e) => {
                warn!("Error refreshing controllers: {}", e);
                Vec::new()
            }
        };

        info!("Found {} external controller(s)", self.external.len());
        for (index, controller) in self.external.iter().enumerate() {
            debug!("  {}: {}", index, controller.name());
        }
        self.external.len()
    }

    #[must_use]
    pub fn virtual_controller(&self) -> &VirtualController {
        &self.virtual_controller
    }

    pub fn virtual_controller_mut(&mut self) -> &mut VirtualController {
        &mut self.virtual_controller
    }

    /// Whether `source` currently resolves to a controller.
    #[must_use]
    pub fn contains(&self, source: InputSource) -> bool {
        match source {
            InputSource::Virtual => true,
            InputSource::External(index) => index < self.external.len(),
        }
    }

    /// Describes `source`, or `None` for a stale external index.
    #[must_use]
    pub fn info(&self, source: InputSource) -> Option<ControllerInfo> {
        match source {
            InputSource::Virtual => Some(self.virtual_controller.info()),
            InputSource::External(index) => self.external.get(index).map(|c| c.info()),
        }
    }

    /// Reads a fresh snapshot of `source`, or `None` for a stale external
    /// index.
    pub fn state(&mut self, source: InputSource) -> Option<InputSnapshot> {
        match source {
            InputSource::Virtual => Some(self.virtual_controller.state()),
            InputSource::External(index) => self.external.get_mut(index).map(|c| {
                c.refresh_state();
                c.state()
            }),
        }
    }

    /// Selection labels: the virtual controller first, then `"<index>: <name>"`
    /// for each external controller.
    #[must_use]
    pub fn labels(&self) -> Vec<(InputSource, String)> {
        let mut labels = vec![(
            InputSource::Virtual,
            format!("V: {}", self.virtual_controller.name()),
        )];
        labels.extend(
            self.external
                .iter()
                .enumerate()
                .map(|(i, c)| (InputSource::External(i), format!("{}: {}", i, c.name()))),
        );
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::input::MockController;
    use crate::controller::virtual_wheel::VIRTUAL_CONTROLLER_NAME;
    use crate::error::ServoRigError;

    fn mock_wheel(name: &'static str, axis0: f64) -> Box<dyn Controller> {
        let mut mock = MockController::new();
        mock.expect_name().returning(move || name.to_string());
        mock.expect_refresh_state().return_const(());
        mock.expect_info().returning(move || ControllerInfo {
            name: name.to_string(),
            num_axes: 2,
            num_buttons: 1,
            num_hats: 1,
        });
        mock.expect_state().returning(move || InputSnapshot {
            axes: vec![axis0, 0.5],
            buttons: vec![true],
            hats: vec![(-1, 0)],
        });
        Box::new(mock)
    }

    fn discovery_with(names: Vec<(&'static str, f64)>) -> Box<dyn ControllerDiscovery> {
        let mut discovery = MockControllerDiscovery::new();
        discovery.expect_discover().returning(move || {
            Ok(names
                .iter()
                .map(|&(name, axis0)| mock_wheel(name, axis0))
                .collect())
        });
        Box::new(discovery)
    }

    #[test]
    fn test_virtual_always_available() {
        let mut aggregator = InputAggregator::new(VirtualController::new(), Box::new(NoDiscovery));
        assert_eq!(aggregator.refresh(), 0);

        assert!(aggregator.contains(InputSource::Virtual));
        let info = aggregator.info(InputSource::Virtual).unwrap();
        assert_eq!(info.name, VIRTUAL_CONTROLLER_NAME);
        assert_eq!(aggregator.state(InputSource::Virtual).unwrap().axes.len(), 4);
    }

    #[test]
    fn test_external_read_verbatim() {
        let mut aggregator = InputAggregator::new(
            VirtualController::new(),
            discovery_with(vec![("Wheel A", -0.25)]),
        );
        assert_eq!(aggregator.refresh(), 1);

        let state = aggregator.state(InputSource::External(0)).unwrap();
        assert_eq!(state.axes, vec![-0.25, 0.5]);
        assert_eq!(state.buttons, vec![true]);
        assert_eq!(state.hats, vec![(-1, 0)]);
    }

    #[test]
    fn test_stale_external_index_is_none() {
        let mut aggregator = InputAggregator::new(VirtualController::new(), Box::new(NoDiscovery));
        aggregator.refresh();

        assert!(!aggregator.contains(InputSource::External(0)));
        assert!(aggregator.info(InputSource::External(0)).is_none());
        assert!(aggregator.state(InputSource::External(0)).is_none());
    }

    #[test]
    fn test_virtual_unaffected_by_external_count() {
        let mut aggregator = InputAggregator::new(
            VirtualController::new(),
            discovery_with(vec![("Wheel A", 0.1), ("Pedals", 0.2)]),
        );
        aggregator.refresh();
        aggregator.virtual_controller_mut().wheel_mut().set_angle(90.0);

        let state = aggregator.state(InputSource::Virtual).unwrap();
        assert!((state.axes[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_discovery_error_leaves_only_virtual() {
        let mut discovery = MockControllerDiscovery::new();
        discovery
            .expect_discover()
            .returning(|| Err(ServoRigError::Controller("no /dev/input".to_string())));

        let mut aggregator = InputAggregator::new(VirtualController::new(), Box::new(discovery));
        assert_eq!(aggregator.refresh(), 0);
        assert_eq!(aggregator.labels().len(), 1);
    }

    #[test]
    fn test_labels_order() {
        let mut aggregator = InputAggregator::new(
            VirtualController::new(),
            discovery_with(vec![("Wheel A", 0.0), ("Pedals", 0.0)]),
        );
        aggregator.refresh();

        let labels = aggregator.labels();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[0].0, InputSource::Virtual);
        assert!(labels[0].1.starts_with("V: "));
        assert_eq!(labels[1], (InputSource::External(0), "0: Wheel A".to_string()));
        assert_eq!(labels[2], (InputSource::External(1), "1: Pedals".to_string()));
    }

    #[test]
    fn test_refresh_reindexes_densely() {
        let mut calls = 0;
        let mut discovery = MockControllerDiscovery::new();
        discovery.expect_discover().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![mock_wheel("Wheel A", 0.1), mock_wheel("Pedals", 0.2)])
            } else {
                Ok(vec![mock_wheel("Pedals", 0.2)])
            }
        });

        let mut aggregator = InputAggregator::new(VirtualController::new(), Box::new(discovery));
        aggregator.refresh();
        assert_eq!(aggregator.info(InputSource::External(1)).unwrap().name, "Pedals");

        // Wheel A unplugged: Pedals moves down to index 0.
        aggregator.refresh();
        assert_eq!(aggregator.info(InputSource::External(0)).unwrap().name, "Pedals");
        assert!(aggregator.info(InputSource::External(1)).is_none());
    }

    #[test]
    fn test_source_display() {
        assert_eq!(InputSource::Virtual.to_string(), "Virtual Controller");
        assert_eq!(InputSource::External(2).to_string(), "Controller 2");
    }
}
