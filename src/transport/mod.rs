//! The `transport` module is the boundary between the harness and the MQTT
//! client library.
//!
//! The harness only ever talks to a [`Connector`] and the [`SessionHandle`]s
//! it hands out. `RumqttConnector` is the production implementation on top
//! of `rumqttc`; tests drive the harness with scripted connectors instead.

pub mod connector;
pub mod options;
pub mod rumqtt;

pub use connector::{Connector, MessageHandler, SessionHandle};
pub use options::{Credentials, Endpoint, MIN_V5_KEEP_ALIVE, ProtocolVersion, Qos, Scheme};
pub use rumqtt::{RumqttConnector, RumqttSession};

#[cfg(test)]
mod tests;
