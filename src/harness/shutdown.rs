//! Shutdown triggers.
//!
//! Every trigger funnels into one `CancellationToken`, which the
//! initialization loop and the steady-state wait both observe.

use std::fmt;
use std::future::pending;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Which external signals may end the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownSignals {
    pub ctrl_c: bool,
    /// A line on stdin, the classic "press Enter to exit".
    pub stdin_line: bool,
    /// Bound on the whole run, measured from when the watcher starts.
    pub run_for: Option<Duration>,
}

impl ShutdownSignals {
    /// No external triggers; only an explicit cancel ends the run.
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Input,
    Elapsed,
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "interrupt received"),
            ShutdownReason::Input => write!(f, "operator input received"),
            ShutdownReason::Elapsed => write!(f, "run duration elapsed"),
            ShutdownReason::Requested => write!(f, "stop requested"),
        }
    }
}

/// Waits for the first enabled trigger and cancels `token`.
///
/// Resolves with `Requested` if something else cancelled the token first.
pub fn spawn_watcher(
    token: CancellationToken,
    signals: ShutdownSignals,
) -> JoinHandle<ShutdownReason> {
    tokio::spawn(async move {
        let reason = tokio::select! {
            _ = token.cancelled() => ShutdownReason::Requested,
            _ = interrupt(signals.ctrl_c) => ShutdownReason::Interrupt,
            _ = stdin_line(signals.stdin_line) => ShutdownReason::Input,
            _ = elapsed(signals.run_for) => ShutdownReason::Elapsed,
        };
        if reason != ShutdownReason::Requested {
            info!("Shutting down: {}", reason);
        }
        token.cancel();
        reason
    })
}

async fn interrupt(enabled: bool) {
    if !enabled {
        return pending().await;
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        debug!("ctrl-c handler unavailable: {}", e);
        pending::<()>().await;
    }
}

async fn stdin_line(enabled: bool) {
    if !enabled {
        return pending().await;
    }
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    match lines.next_line().await {
        Ok(Some(_)) => {}
        // A closed or unreadable stdin is not an operator request.
        Ok(None) | Err(_) => pending::<()>().await,
    }
}

async fn elapsed(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => pending().await,
    }
}
