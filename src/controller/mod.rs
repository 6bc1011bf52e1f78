//! # Controller Module
//!
//! Controller input handling.
//!
//! This module handles:
//! - The continuous-rotation virtual wheel and throttle
//! - External controller discovery and reads via evdev
//! - One snapshot interface over both, selected by [`aggregator::InputSource`]

pub mod aggregator;
pub mod angle_model;
pub mod evdev_source;
pub mod input;
pub mod virtual_wheel;
