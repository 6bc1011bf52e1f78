//! # Servo Rig Library
//!
//! Drive RC servos from a steering wheel, gamepad or on-screen virtual wheel.
//!
//! This library provides the core functionality for a low-cost racing-sim rig:
//! controller inputs are mapped to servo angles and sent as `S<id>:<angle>`
//! commands to a microcontroller over a serial link.

pub mod config;
pub mod console;
pub mod controller;
pub mod display;
pub mod error;
pub mod mapping;
pub mod poll;
pub mod serial;
pub mod telemetry;
