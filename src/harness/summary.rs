//! Summary file and run report.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::client::{SessionFailure, SessionState};
use crate::utils::HarnessError;

/// Final count of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryLine {
    pub index: usize,
    pub client_id: String,
    pub count: u64,
    pub state: SessionState,
    pub failure: Option<SessionFailure>,
}

impl SummaryLine {
    /// `Client {index} received {count} messages.`, plus an annotation for
    /// sessions that never reached a clean lifecycle.
    pub fn render(&self) -> String {
        let mut line = format!("Client {} received {} messages.", self.index, self.count);
        if let Some(failure) = &self.failure {
            line.push_str(&format!(" [failed: {}: {}]", failure.stage, failure.reason));
        } else if self.not_started() {
            line.push_str(" [not started]");
        }
        line
    }

    /// Shutdown arrived before this session was subscribed.
    pub fn not_started(&self) -> bool {
        self.failure.is_none()
            && matches!(
                self.state,
                SessionState::Uninitialized | SessionState::Cancelled
            )
    }
}

/// One line per client, ascending by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRecord {
    pub lines: Vec<SummaryLine>,
}

impl SummaryRecord {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.render());
            out.push('\n');
        }
        out
    }

    pub fn total(&self) -> u64 {
        self.lines.iter().map(|line| line.count).sum()
    }

    /// Writes the rendered summary to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<(), HarnessError> {
        ensure_parent(path)?;
        let mut file = fs::File::create(path)?;
        file.write_all(self.render().as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Aggregate outcome of a run, printed to the operator and optionally saved as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub clients: usize,
    pub total_messages: u64,
    pub connect_failures: usize,
    pub subscribe_failures: usize,
    pub disconnect_failures: usize,
    pub not_started: usize,
    pub summary_file: PathBuf,
    pub summary_error: Option<String>,
    pub sessions: Vec<SummaryLine>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.connect_failures + self.subscribe_failures + self.disconnect_failures > 0
            || self.summary_error.is_some()
    }

    pub fn write_json(&self, path: &Path) -> Result<(), HarnessError> {
        ensure_parent(path)?;
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<(), HarnessError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
