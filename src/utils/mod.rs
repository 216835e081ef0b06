//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `mqttswarm` harness.
//!
//! It holds the error taxonomy shared by every module and the console
//! logging setup.

pub mod error;
pub mod logging;

pub use error::HarnessError;
