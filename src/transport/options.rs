//! Wire-level options shared by the configuration layer and the connectors.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

/// Delivery guarantee requested at subscribe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(format!("qos must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> u8 {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

/// Shortest keep-alive an MQTT 5 session accepts; it cannot be disabled there.
pub const MIN_V5_KEEP_ALIVE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProtocolVersion {
    V311,
    V5,
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "3.1.1" | "311" | "v311" | "4" => Ok(ProtocolVersion::V311),
            "5" | "5.0" | "v5" => Ok(ProtocolVersion::V5),
            other => Err(format!("unsupported protocol version '{other}'")),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V311 => write!(f, "3.1.1"),
            ProtocolVersion::V5 => write!(f, "5"),
        }
    }
}

/// Transport used to reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scheme {
    Tcp,
    Ws,
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tcp" | "mqtt" => Ok(Scheme::Tcp),
            "ws" => Ok(Scheme::Ws),
            other => Err(format!("unsupported transport scheme '{other}'")),
        }
    }
}

/// Broker address as seen by one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    /// `ws://host:port/path` for WebSocket, `host:port` for plain TCP.
    pub fn url(&self) -> String {
        match self.scheme {
            Scheme::Ws => {
                let path = if self.path.starts_with('/') {
                    self.path.clone()
                } else {
                    format!("/{}", self.path)
                };
                format!("ws://{}:{}{}", self.host, self.port, path)
            }
            Scheme::Tcp => format!("{}:{}", self.host, self.port),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
