//! The `client` module defines the representation of one client session in
//! the harness.
//!
//! It provides `ClientSession`, which ties a session index to its derived
//! client identifier, its connection configuration, its lifecycle state and
//! its private log sink (`ClientLog`).

pub mod log;
pub mod session;

pub use log::ClientLog;
pub use session::{ClientSession, FailureStage, SessionConfig, SessionFailure, SessionState};

#[cfg(test)]
mod tests;
