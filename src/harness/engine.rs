//! Harness engine
//!
//! Drives the whole run in two phases:
//! - initialization: sessions are connected and subscribed one at a time,
//!   in index order, each bounded by the communication timeout. A failing
//!   session is recorded and skipped; the others carry on.
//! - steady state: every subscribed session receives on its own connector
//!   task until the shutdown token is cancelled.
//!
//! Teardown disconnects every session (again in index order, never stopping
//! at the first failure) and only then snapshots the counters, so the
//! summary cannot miss an in-flight delivery.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::{ClientLog, ClientSession, FailureStage, SessionConfig, SessionState};
use crate::config::Settings;
use crate::harness::counters::CounterTable;
use crate::harness::shutdown::{ShutdownSignals, spawn_watcher};
use crate::harness::summary::{RunReport, SummaryLine, SummaryRecord};
use crate::transport::{Connector, MessageHandler, Qos, SessionHandle};
use crate::utils::HarnessError;

/// Extra time granted on top of the communication timeout before a
/// disconnect is abandoned.
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Counts deliveries for one session and records them in its log.
#[derive(Debug, Clone)]
pub struct MessageTally {
    index: usize,
    counters: Arc<CounterTable>,
    log: Arc<ClientLog>,
    echo_payloads: bool,
}

impl MessageTally {
    pub fn new(
        index: usize,
        counters: Arc<CounterTable>,
        log: Arc<ClientLog>,
        echo_payloads: bool,
    ) -> Self {
        Self {
            index,
            counters,
            log,
            echo_payloads,
        }
    }

    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        let Some(count) = self.counters.increment(self.index) else {
            warn!("delivery for unknown client index {}", self.index);
            return;
        };
        self.log.info(format!(
            "Client {} received message #{} on topic: {}",
            self.index, count, topic
        ));
        if self.echo_payloads {
            println!("Message received: {}", String::from_utf8_lossy(payload));
        }
    }

    pub fn into_handler(self) -> MessageHandler {
        Arc::new(move |topic: &str, payload: &[u8]| self.on_message(topic, payload))
    }
}

/// Outcome of the initialization phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitOutcome {
    pub subscribed: Vec<usize>,
    pub failed: Vec<usize>,
    /// Not attempted, or abandoned midway, because shutdown arrived first.
    pub skipped: Vec<usize>,
}

pub struct Harness<C: Connector> {
    settings: Settings,
    connector: C,
    topic: String,
    qos: Qos,
    counters: Arc<CounterTable>,
    sessions: Vec<ClientSession<C::Session>>,
    disconnect_failures: Vec<usize>,
    shutdown: CancellationToken,
    run_id: Uuid,
    started_at: DateTime<Utc>,
}

impl<C: Connector> Harness<C> {
    /// Validates `settings` and prepares one session per client index.
    ///
    /// No network activity happens here; every counter starts at zero.
    pub fn initialize(settings: Settings, connector: C) -> Result<Self, HarnessError> {
        settings.validate()?;

        let clients = settings.harness.clients;
        let counters = Arc::new(CounterTable::new(clients));
        let log_root = PathBuf::from(&settings.harness.log_dir);

        let mut sessions = Vec::with_capacity(clients);
        for index in 0..clients {
            let config = SessionConfig::from_settings(&settings, index)?;
            let log = Arc::new(ClientLog::new(&log_root, index));
            sessions.push(ClientSession::new(config, log));
        }

        Ok(Self {
            topic: settings.subscription.topic.clone(),
            qos: settings.qos()?,
            settings,
            connector,
            counters,
            sessions,
            disconnect_failures: Vec::new(),
            shutdown: CancellationToken::new(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn counters(&self) -> Arc<CounterTable> {
        self.counters.clone()
    }

    pub fn sessions(&self) -> &[ClientSession<C::Session>] {
        &self.sessions
    }

    /// Token that ends the run when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Connects and subscribes every session, one after the other.
    pub async fn connect_and_subscribe_all(&mut self) -> InitOutcome {
        let limit = self.settings.communication_timeout();
        let echo = self.settings.harness.echo_payloads;
        let mut outcome = InitOutcome::default();

        for session in self.sessions.iter_mut() {
            let index = session.index();
            if self.shutdown.is_cancelled() {
                session
                    .log
                    .warn(format!("Client {index} not started: shutdown requested"));
                outcome.skipped.push(index);
                continue;
            }

            session.state = SessionState::Connecting;
            session.log.debug(format!(
                "Client {} connecting to {} as {}",
                index,
                session.config.endpoint.url(),
                session.client_id()
            ));

            let tally = MessageTally::new(index, self.counters.clone(), session.log.clone(), echo);
            let connect = self.connector.connect(&session.config, tally.into_handler());
            let connected = bounded(&self.shutdown, limit, index, "connect", connect).await;
            let mut handle = match connected {
                Ok(handle) => handle,
                Err(HarnessError::Cancelled { .. }) => {
                    session.state = SessionState::Cancelled;
                    session
                        .log
                        .warn(format!("Client {index} not started: shutdown requested"));
                    outcome.skipped.push(index);
                    continue;
                }
                Err(e) => {
                    error!("{}", e);
                    session.fail(FailureStage::Connect, reason_of(&e));
                    outcome.failed.push(index);
                    continue;
                }
            };
            session.log.info(format!("Client {index} connected"));

            let subscribe = handle.subscribe(&self.topic, self.qos);
            let subscribed = bounded(&self.shutdown, limit, index, "subscribe", subscribe).await;
            match subscribed {
                Ok(()) => {
                    session.handle = Some(handle);
                    session.state = SessionState::Subscribed;
                    session
                        .log
                        .info(format!("Client {} subscribed to {}", index, self.topic));
                    println!("Connected to broker, client ID: {index}");
                    outcome.subscribed.push(index);
                }
                Err(e) => {
                    // Not part of the steady state; close it right away.
                    session.state = SessionState::Disconnecting;
                    match timeout(limit + DISCONNECT_GRACE, handle.disconnect()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!("{}", e),
                        Err(_) => debug!("client {} disconnect timed out", index),
                    }
                    // A persistent session may have been handed queued messages already.
                    if let Some(discarded) = self.counters.reset(index).filter(|n| *n > 0) {
                        session.log.warn(format!(
                            "Client {index} discarded {discarded} message(s) received before subscribing"
                        ));
                    }

                    if let HarnessError::Cancelled { .. } = e {
                        session.state = SessionState::Cancelled;
                        session
                            .log
                            .warn(format!("Client {index} not started: shutdown requested"));
                        outcome.skipped.push(index);
                    } else {
                        error!("{}", e);
                        session.fail(FailureStage::Subscribe, reason_of(&e));
                        session.state = SessionState::Disconnected;
                        outcome.failed.push(index);
                    }
                    session.log.flush();
                }
            }
        }

        info!(
            "Initialization finished: {} subscribed, {} failed, {} skipped",
            outcome.subscribed.len(),
            outcome.failed.len(),
            outcome.skipped.len()
        );
        outcome
    }

    /// Suspends until shutdown is requested.
    pub async fn await_shutdown(&self) {
        self.shutdown.cancelled().await;
    }

    /// Disconnects every connected session in index order.
    ///
    /// Returns the indices that did not disconnect cleanly.
    pub async fn disconnect_all(&mut self) -> Vec<usize> {
        let limit = self.settings.communication_timeout() + DISCONNECT_GRACE;
        let mut failed = Vec::new();

        for session in self.sessions.iter_mut() {
            let Some(handle) = session.handle.take() else {
                session.log.flush();
                continue;
            };
            let index = session.index();
            session.state = SessionState::Disconnecting;

            let result = match timeout(limit, handle.disconnect()).await {
                Ok(result) => result,
                Err(_) => Err(HarnessError::Timeout {
                    index,
                    operation: "disconnect",
                }),
            };
            match result {
                Ok(()) => session.log.info(format!("Client {index} disconnected")),
                Err(e) => {
                    warn!("{}", e);
                    session.fail(FailureStage::Disconnect, reason_of(&e));
                    failed.push(index);
                }
            }
            session.state = SessionState::Disconnected;
            session.log.flush();
        }

        if !failed.is_empty() {
            warn!(
                "{} client(s) failed to disconnect cleanly: {:?}",
                failed.len(),
                failed
            );
        }
        self.disconnect_failures.extend(failed.iter().copied());
        failed
    }

    /// Reads every counter and writes the summary file.
    ///
    /// Counts are final only once `disconnect_all` has returned.
    pub fn write_summary(&self) -> Result<SummaryRecord, HarnessError> {
        let record = self.summary();
        let path = PathBuf::from(&self.settings.harness.summary_file);
        record.write_to(&path)?;
        info!("Summary written to {}", path.display());
        Ok(record)
    }

    /// Current summary without touching the filesystem.
    pub fn summary(&self) -> SummaryRecord {
        let counts = self.counters.snapshot();
        let lines = self
            .sessions
            .iter()
            .zip(counts)
            .map(|(session, count)| SummaryLine {
                index: session.index(),
                client_id: session.client_id().to_string(),
                count,
                state: session.state,
                failure: session.failure.clone(),
            })
            .collect();
        SummaryRecord { lines }
    }

    /// Full lifecycle: initialize sessions, wait for a shutdown trigger,
    /// disconnect, then write the summary (and the JSON report if configured).
    pub async fn run(mut self, signals: ShutdownSignals) -> RunReport {
        let watcher = spawn_watcher(self.shutdown.clone(), signals.clone());

        self.connect_and_subscribe_all().await;

        if !self.shutdown.is_cancelled() {
            if signals.stdin_line {
                println!("Press Enter to exit...");
            } else if signals.ctrl_c {
                println!("Press Ctrl-C to exit...");
            }
        }
        self.await_shutdown().await;
        watcher.abort();

        self.disconnect_all().await;

        let summary = match self.write_summary() {
            Ok(record) => Ok(record),
            Err(e) => {
                error!("Failed to write summary: {}", e);
                Err(e.to_string())
            }
        };

        let report = self.report(summary.err());
        if let Some(path) = &self.settings.harness.report_file {
            if let Err(e) = report.write_json(&PathBuf::from(path)) {
                error!("Failed to write run report: {}", e);
            }
        }
        report
    }

    pub fn report(&self, summary_error: Option<String>) -> RunReport {
        let sessions = self.summary().lines;
        let failed_at = |stage: FailureStage| {
            sessions
                .iter()
                .filter(|line| line.failure.as_ref().is_some_and(|f| f.stage == stage))
                .count()
        };

        RunReport {
            run_id: self.run_id.to_string(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            clients: sessions.len(),
            total_messages: sessions.iter().map(|line| line.count).sum(),
            connect_failures: failed_at(FailureStage::Connect),
            subscribe_failures: failed_at(FailureStage::Subscribe),
            disconnect_failures: self.disconnect_failures.len(),
            not_started: sessions.iter().filter(|line| line.not_started()).count(),
            summary_file: PathBuf::from(&self.settings.harness.summary_file),
            summary_error,
            sessions,
        }
    }
}

/// Runs `op` unless shutdown is requested or `limit` elapses first.
async fn bounded<T>(
    shutdown: &CancellationToken,
    limit: Duration,
    index: usize,
    operation: &'static str,
    op: impl Future<Output = Result<T, HarnessError>>,
) -> Result<T, HarnessError> {
    tokio::select! {
        _ = shutdown.cancelled() => Err(HarnessError::Cancelled { index, operation }),
        result = timeout(limit, op) => match result {
            Ok(result) => result,
            Err(_) => Err(HarnessError::Timeout { index, operation }),
        },
    }
}

/// Short cause for summary annotations, without the "client N" prefix.
fn reason_of(err: &HarnessError) -> String {
    match err {
        HarnessError::Connect { reason, .. }
        | HarnessError::Subscribe { reason, .. }
        | HarnessError::Disconnect { reason, .. } => reason.clone(),
        HarnessError::Timeout { operation, .. } => format!("{operation} timed out"),
        other => other.to_string(),
    }
}
