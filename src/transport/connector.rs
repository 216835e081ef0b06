use std::future::Future;
use std::sync::Arc;

use crate::client::SessionConfig;
use crate::transport::Qos;
use crate::utils::HarnessError;

/// Callback invoked for every PUBLISH delivered to a session: `(topic, payload)`.
///
/// Called from the connector's own tasks, possibly concurrently with the
/// handlers of other sessions.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Factory for live MQTT sessions.
pub trait Connector: Send + Sync {
    type Session: SessionHandle;

    /// Opens a session and resolves once the broker has acknowledged it.
    ///
    /// `handler` is installed before the first inbound packet is read, so
    /// messages queued for a persistent session are never missed.
    fn connect(
        &self,
        config: &SessionConfig,
        handler: MessageHandler,
    ) -> impl Future<Output = Result<Self::Session, HarnessError>> + Send;
}

/// A connected session.
pub trait SessionHandle: Send {
    /// Resolves once the broker has granted the subscription.
    fn subscribe(
        &mut self,
        topic: &str,
        qos: Qos,
    ) -> impl Future<Output = Result<(), HarnessError>> + Send;

    /// Closes the session.
    ///
    /// Must resolve within the session's communication timeout, and must
    /// not resolve while the session's handler can still be invoked.
    fn disconnect(self) -> impl Future<Output = Result<(), HarnessError>> + Send;
}
