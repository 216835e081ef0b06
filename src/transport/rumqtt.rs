//! `rumqttc`-backed connector.
//!
//! Each session gets its own `AsyncClient` and event loop. `connect` polls
//! the event loop until CONNACK, then hands it to a driver task that keeps
//! polling for the rest of the session: PUBLISH packets go to the message
//! handler, SUBACKs are forwarded to whoever is waiting in `subscribe`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::v5::mqttbytes::QoS as QoS5;
use rumqttc::v5::mqttbytes::v5::{
    ConnectProperties, ConnectReturnCode as ConnectReturnCode5, Packet as Packet5,
    SubscribeReasonCode as SubscribeReasonCode5,
};
use rumqttc::v5::{ConnectionError as ConnectionError5, StateError as StateError5};
use rumqttc::{
    ConnectReturnCode, Event, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::SessionConfig;
use crate::transport::{
    Connector, MIN_V5_KEEP_ALIVE, MessageHandler, ProtocolVersion, Qos, Scheme, SessionHandle,
};
use crate::utils::HarnessError;

/// Request queue depth between an `AsyncClient` and its event loop.
const REQUEST_CAPACITY: usize = 64;

/// Pause before polling again after a connection error; rumqttc reconnects on the next poll.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

type SubAckResult = Result<(), String>;

#[derive(Debug, Clone, Default)]
pub struct RumqttConnector;

impl RumqttConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for RumqttConnector {
    type Session = RumqttSession;

    async fn connect(
        &self,
        config: &SessionConfig,
        handler: MessageHandler,
    ) -> Result<RumqttSession, HarnessError> {
        match config.protocol {
            ProtocolVersion::V311 => connect_v311(config, handler).await,
            ProtocolVersion::V5 => connect_v5(config, handler).await,
        }
    }
}

enum MqttClient {
    V311(rumqttc::AsyncClient),
    V5(rumqttc::v5::AsyncClient),
}

/// Shared between a session and its driver task.
struct DriverControl {
    /// Set once a DISCONNECT has been requested; connection errors then end the driver.
    closing: AtomicBool,
    /// Hard stop, used when a graceful close does not finish in time.
    stop: CancellationToken,
}

pub struct RumqttSession {
    index: usize,
    client: MqttClient,
    sub_acks: mpsc::UnboundedReceiver<SubAckResult>,
    control: Arc<DriverControl>,
    driver: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl SessionHandle for RumqttSession {
    async fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), HarnessError> {
        let requested = match &self.client {
            MqttClient::V311(client) => client
                .subscribe(topic, qos_v311(qos))
                .await
                .map_err(|e| e.to_string()),
            MqttClient::V5(client) => client
                .subscribe(topic, qos_v5(qos))
                .await
                .map_err(|e| e.to_string()),
        };
        requested.map_err(|reason| HarnessError::Subscribe {
            index: self.index,
            reason,
        })?;

        match timeout(self.timeout, self.sub_acks.recv()).await {
            Ok(Some(Ok(()))) => Ok(()),
            Ok(Some(Err(reason))) => Err(HarnessError::Subscribe {
                index: self.index,
                reason,
            }),
            Ok(None) => Err(HarnessError::Subscribe {
                index: self.index,
                reason: "connection closed before SUBACK".to_string(),
            }),
            Err(_) => Err(HarnessError::Timeout {
                index: self.index,
                operation: "subscribe",
            }),
        }
    }

    async fn disconnect(mut self) -> Result<(), HarnessError> {
        self.control.closing.store(true, Ordering::SeqCst);

        let requested = match &self.client {
            MqttClient::V311(client) => client.disconnect().await.map_err(|e| e.to_string()),
            MqttClient::V5(client) => client.disconnect().await.map_err(|e| e.to_string()),
        };

        let Some(mut driver) = self.driver.take() else {
            return Ok(());
        };

        match timeout(self.timeout, &mut driver).await {
            Ok(_) => requested.map_err(|reason| HarnessError::Disconnect {
                index: self.index,
                reason,
            }),
            Err(_) => {
                self.control.stop.cancel();
                let _ = driver.await;
                Err(HarnessError::Timeout {
                    index: self.index,
                    operation: "disconnect",
                })
            }
        }
    }
}

impl Drop for RumqttSession {
    fn drop(&mut self) {
        self.control.stop.cancel();
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

fn qos_v311(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn qos_v5(qos: Qos) -> QoS5 {
    match qos {
        Qos::AtMostOnce => QoS5::AtMostOnce,
        Qos::AtLeastOnce => QoS5::AtLeastOnce,
        Qos::ExactlyOnce => QoS5::ExactlyOnce,
    }
}

/// Host argument and transport for `MqttOptions::new`.
///
/// For WebSocket rumqttc takes the whole URL as the host and ignores the port.
fn broker_address(config: &SessionConfig) -> (String, Transport) {
    match config.endpoint.scheme {
        Scheme::Ws => (config.endpoint.url(), Transport::Ws),
        Scheme::Tcp => (config.endpoint.host.clone(), Transport::Tcp),
    }
}

pub(crate) fn options_v311(config: &SessionConfig) -> MqttOptions {
    let (host, transport) = broker_address(config);
    let mut options = MqttOptions::new(config.client_id.clone(), host, config.endpoint.port);
    options
        .set_transport(transport)
        .set_clean_session(config.clean_session)
        .set_keep_alive(config.keep_alive);
    if let Some(creds) = &config.credentials {
        options.set_credentials(creds.username.clone(), creds.password.clone());
    }
    options
}

pub(crate) fn options_v5(config: &SessionConfig) -> rumqttc::v5::MqttOptions {
    let (host, transport) = broker_address(config);
    let mut options =
        rumqttc::v5::MqttOptions::new(config.client_id.clone(), host, config.endpoint.port);
    let expiry = u32::try_from(config.session_expiry.as_secs()).unwrap_or(u32::MAX);
    let properties = ConnectProperties {
        session_expiry_interval: Some(expiry),
        ..ConnectProperties::new()
    };
    // v5 has no "disabled" keep-alive and rumqttc panics below the minimum.
    options
        .set_transport(transport)
        .set_clean_start(config.clean_session)
        .set_connect_properties(properties)
        .set_keep_alive(config.keep_alive.max(MIN_V5_KEEP_ALIVE));
    if let Some(creds) = &config.credentials {
        options.set_credentials(creds.username.clone(), creds.password.clone());
    }
    options
}

fn connect_error(config: &SessionConfig, reason: impl ToString) -> HarnessError {
    HarnessError::Connect {
        index: config.index,
        reason: reason.to_string(),
    }
}

fn new_control() -> Arc<DriverControl> {
    Arc::new(DriverControl {
        closing: AtomicBool::new(false),
        stop: CancellationToken::new(),
    })
}

async fn connect_v311(
    config: &SessionConfig,
    handler: MessageHandler,
) -> Result<RumqttSession, HarnessError> {
    let (client, mut eventloop) = rumqttc::AsyncClient::new(options_v311(config), REQUEST_CAPACITY);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(connect_error(config, format!("{:?}", ack.code)));
                }
                debug!(
                    "client {} connected (session present: {})",
                    config.index, ack.session_present
                );
                break;
            }
            Ok(_) => {}
            Err(e) => return Err(connect_error(config, e)),
        }
    }

    let (ack_tx, ack_rx) = mpsc::unbounded_channel();
    let control = new_control();
    let driver = tokio::spawn(drive_v311(
        config.index,
        eventloop,
        handler,
        ack_tx,
        control.clone(),
    ));

    Ok(RumqttSession {
        index: config.index,
        client: MqttClient::V311(client),
        sub_acks: ack_rx,
        control,
        driver: Some(driver),
        timeout: config.communication_timeout,
    })
}

async fn drive_v311(
    index: usize,
    mut eventloop: rumqttc::EventLoop,
    handler: MessageHandler,
    sub_acks: mpsc::UnboundedSender<SubAckResult>,
    control: Arc<DriverControl>,
) {
    loop {
        let event = tokio::select! {
            _ = control.stop.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handler(publish.topic.as_str(), &publish.payload[..]);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let granted = ack
                    .return_codes
                    .iter()
                    .all(|code| matches!(code, SubscribeReasonCode::Success(_)));
                let result = if granted {
                    Ok(())
                } else {
                    Err(format!("broker rejected subscription: {:?}", ack.return_codes))
                };
                let _ = sub_acks.send(result);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if control.closing.load(Ordering::SeqCst) {
                    break;
                }
                warn!("client {} connection error: {}", index, e);
                tokio::select! {
                    _ = control.stop.cancelled() => break,
                    _ = sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
    debug!("client {} event loop stopped", index);
}

async fn connect_v5(
    config: &SessionConfig,
    handler: MessageHandler,
) -> Result<RumqttSession, HarnessError> {
    let (client, mut eventloop) =
        rumqttc::v5::AsyncClient::new(options_v5(config), REQUEST_CAPACITY);

    loop {
        match eventloop.poll().await {
            Ok(rumqttc::v5::Event::Incoming(Packet5::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode5::Success {
                    return Err(connect_error(config, format!("{:?}", ack.code)));
                }
                debug!(
                    "client {} connected (session present: {})",
                    config.index, ack.session_present
                );
                break;
            }
            Ok(_) => {}
            Err(e) => return Err(connect_error(config, e)),
        }
    }

    let (ack_tx, ack_rx) = mpsc::unbounded_channel();
    let control = new_control();
    let driver = tokio::spawn(drive_v5(
        config.index,
        eventloop,
        handler,
        ack_tx,
        control.clone(),
    ));

    Ok(RumqttSession {
        index: config.index,
        client: MqttClient::V5(client),
        sub_acks: ack_rx,
        control,
        driver: Some(driver),
        timeout: config.communication_timeout,
    })
}

async fn drive_v5(
    index: usize,
    mut eventloop: rumqttc::v5::EventLoop,
    handler: MessageHandler,
    sub_acks: mpsc::UnboundedSender<SubAckResult>,
    control: Arc<DriverControl>,
) {
    loop {
        let event = tokio::select! {
            _ = control.stop.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(rumqttc::v5::Event::Incoming(Packet5::Publish(publish))) => {
                let topic = String::from_utf8_lossy(&publish.topic);
                handler(topic.as_ref(), &publish.payload[..]);
            }
            Ok(rumqttc::v5::Event::Incoming(Packet5::SubAck(ack))) => {
                let granted = ack
                    .return_codes
                    .iter()
                    .all(|code| matches!(code, SubscribeReasonCode5::Success(_)));
                let result = if granted {
                    Ok(())
                } else {
                    Err(format!("broker rejected subscription: {:?}", ack.return_codes))
                };
                let _ = sub_acks.send(result);
            }
            Ok(rumqttc::v5::Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            // The v5 state machine reports a rejected SUBACK as a poll error.
            Err(ConnectionError5::MqttState(StateError5::SubFail { reason })) => {
                let _ = sub_acks.send(Err(format!("broker rejected subscription: {reason:?}")));
            }
            Err(e) => {
                if control.closing.load(Ordering::SeqCst) {
                    break;
                }
                warn!("client {} connection error: {}", index, e);
                tokio::select! {
                    _ = control.stop.cancelled() => break,
                    _ = sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
    debug!("client {} event loop stopped", index);
}
