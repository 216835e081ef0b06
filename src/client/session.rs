use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::client::ClientLog;
use crate::config::Settings;
use crate::transport::{Credentials, Endpoint, ProtocolVersion};
use crate::utils::HarnessError;

/// Everything a connector needs to open one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub index: usize,
    pub client_id: String,
    pub endpoint: Endpoint,
    pub credentials: Option<Credentials>,
    /// `false` asks the broker to keep the session across disconnects.
    pub clean_session: bool,
    pub session_expiry: Duration,
    pub communication_timeout: Duration,
    pub keep_alive: Duration,
    pub protocol: ProtocolVersion,
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings, index: usize) -> Result<Self, HarnessError> {
        Ok(Self {
            index,
            client_id: settings.client_id(index),
            endpoint: settings.endpoint()?,
            credentials: settings.credentials()?,
            clean_session: settings.session.clean_session,
            session_expiry: Duration::from_secs(u64::from(settings.session.session_expiry_secs)),
            communication_timeout: settings.communication_timeout(),
            keep_alive: Duration::from_secs(settings.session.keep_alive_secs),
            protocol: settings.protocol()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Connecting,
    /// Shutdown arrived while connecting or subscribing.
    Cancelled,
    Subscribed,
    Disconnecting,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Connect,
    Subscribe,
    Disconnect,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Connect => write!(f, "connect"),
            FailureStage::Subscribe => write!(f, "subscribe"),
            FailureStage::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Why a session stopped short of a clean lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFailure {
    pub stage: FailureStage,
    pub reason: String,
}

/// One logical client identity, owned by the harness for the whole run.
///
/// `S` is the connector's live session handle; it is present from a
/// successful connect until disconnect.
pub struct ClientSession<S> {
    pub config: SessionConfig,
    pub state: SessionState,
    pub failure: Option<SessionFailure>,
    pub log: Arc<ClientLog>,
    pub(crate) handle: Option<S>,
}

impl<S> ClientSession<S> {
    pub fn new(config: SessionConfig, log: Arc<ClientLog>) -> Self {
        Self {
            config,
            state: SessionState::Uninitialized,
            failure: None,
            log,
            handle: None,
        }
    }

    pub fn index(&self) -> usize {
        self.config.index
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Records a failure and writes it to the session's own log.
    ///
    /// The first failure wins; a later disconnect failure does not hide a
    /// connect or subscribe failure.
    pub fn fail(&mut self, stage: FailureStage, reason: impl Into<String>) {
        let reason = reason.into();
        self.log.error(format!(
            "Client {} {} failed: {}",
            self.config.index, stage, reason
        ));
        if self.failure.is_none() {
            self.failure = Some(SessionFailure { stage, reason });
        }
    }
}

impl<S> fmt::Debug for ClientSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("index", &self.config.index)
            .field("client_id", &self.config.client_id)
            .field("state", &self.state)
            .field("failure", &self.failure)
            .field("connected", &self.handle.is_some())
            .finish()
    }
}
