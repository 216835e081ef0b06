//! Per-client log sink.
//!
//! Every session owns one append-only text log under
//! `{root}/client{index}/`. A new file is started whenever the local date
//! changes, named `client{index}{yyyyMMdd}.txt`.
//!
//! Entries are buffered in memory so the delivery path does not pay a
//! syscall per message. Warnings and errors are flushed right away; the
//! rest is flushed on `flush`, on a date change, and on drop.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local, NaiveDate};
use parking_lot::Mutex;
use tracing::{Level, warn};

#[derive(Debug)]
pub struct ClientLog {
    index: usize,
    dir: PathBuf,
    current: Mutex<Option<(NaiveDate, BufWriter<File>)>>,
    write_failed: AtomicBool,
}

impl ClientLog {
    pub fn new(root: impl AsRef<Path>, index: usize) -> Self {
        Self {
            index,
            dir: root.as_ref().join(format!("client{index}")),
            current: Mutex::new(None),
            write_failed: AtomicBool::new(false),
        }
    }

    /// File that entries written on `date` land in.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("client{}{}.txt", self.index, date.format("%Y%m%d")))
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.write_at(Local::now(), Level::DEBUG, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.write_at(Local::now(), Level::INFO, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.write_at(Local::now(), Level::WARN, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.write_at(Local::now(), Level::ERROR, message.as_ref());
    }

    pub(crate) fn write_at(&self, now: DateTime<Local>, level: Level, message: &str) {
        let line = format!(
            "{} [{}] {}\n",
            now.format("%Y-%m-%d %H:%M:%S%.3f %:z"),
            level_tag(level),
            message
        );

        let mut current = self.current.lock();
        let result = self
            .file_for(&mut current, now.date_naive())
            .and_then(|file| {
                file.write_all(line.as_bytes())?;
                if level <= Level::WARN {
                    file.flush()?;
                }
                Ok(())
            });

        if let Err(e) = result {
            self.report_failure(&e);
            *current = None;
        }
    }

    /// Pushes buffered entries to disk.
    pub fn flush(&self) {
        let mut current = self.current.lock();
        if let Some((_, file)) = current.as_mut() {
            if let Err(e) = file.flush() {
                self.report_failure(&e);
                *current = None;
            }
        }
    }

    fn report_failure(&self, e: &std::io::Error) {
        // Counting must go on; complain once per sink.
        if !self.write_failed.swap(true, Ordering::Relaxed) {
            warn!("client {} log is not writable: {}", self.index, e);
        }
    }

    fn file_for<'a>(
        &self,
        current: &'a mut Option<(NaiveDate, BufWriter<File>)>,
        date: NaiveDate,
    ) -> std::io::Result<&'a mut BufWriter<File>> {
        let stale = !matches!(current.as_ref(), Some((day, _)) if *day == date);
        if stale {
            if let Some((_, mut previous)) = current.take() {
                previous.flush()?;
            }
            fs::create_dir_all(&self.dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(date))?;
            *current = Some((date, BufWriter::new(file)));
        }
        match current.as_mut() {
            Some((_, file)) => Ok(file),
            None => Err(std::io::Error::other("log file unavailable")),
        }
    }
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::TRACE => "VRB",
        Level::DEBUG => "DBG",
        Level::INFO => "INF",
        Level::WARN => "WRN",
        Level::ERROR => "ERR",
    }
}
