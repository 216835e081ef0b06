//! # mqttswarm
//!
//! `mqttswarm` is a load-testing harness for MQTT brokers. It opens a
//! configurable number of client sessions, subscribes each one to the same
//! topic, counts the messages every session receives and, once told to stop,
//! disconnects everything and writes a per-client summary.
//!
//! ## Core Modules
//!
//! - `harness`: the run itself: session lifecycle, counters, shutdown and summary.
//! - `client`: one client session, its connection settings and its log sink.
//! - `config`: loading, merging and validating the harness configuration.
//! - `transport`: the boundary to the MQTT client library (`rumqttc`).
//! - `utils`: shared error type and console logging setup.

pub mod client;
pub mod config;
pub mod harness;
pub mod transport;
pub mod utils;
