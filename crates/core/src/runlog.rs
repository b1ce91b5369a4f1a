//! Persistent, append-only run log.
//!
//! Every event becomes one `RFC3339 [LEVEL] message` line in the log file, is mirrored to
//! the `log` facade, and is forwarded to in-process subscribers. Subscribers additionally
//! receive a terminal [`RunEvent::Finished`] or [`RunEvent::Failed`] notification. Worker
//! lines go through a [`RunSession`] and are dropped once their run has been closed.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use log::Level;
use parking_lot::Mutex;
use serde::Serialize;

const LOG_TARGET: &str = "unravel::run";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

impl LogLine {
    /// The exact text written to the log file (without the trailing newline).
    pub fn render(&self) -> String {
        format!("{} [{}] {}", self.timestamp, self.level, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Line(LogLine),
    Finished(String),
    Failed(String),
}

/// Lines kept in memory for [`RunLog::lines`]; the file keeps everything.
pub const HISTORY_LIMIT: usize = 4096;

#[derive(Debug, Default)]
struct Inner {
    file: Option<File>,
    history: VecDeque<LogLine>,
    subscribers: Vec<Sender<RunEvent>>,
    session: u64,
    open: bool,
}

impl Inner {
    fn push(&mut self, level: Level, message: &str) {
        let message = message.replace(['\n', '\r'], " ");
        log::log!(target: LOG_TARGET, level, "{message}");
        let line = LogLine {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: level.as_str().to_string(),
            message,
        };
        if let Some(file) = self.file.as_mut() {
            if let Err(err) = writeln!(file, "{}", line.render()) {
                log::warn!(target: LOG_TARGET, "failed to append to run log: {err}");
            }
        }
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(line.clone());
        broadcast(&mut self.subscribers, RunEvent::Line(line));
    }

    fn close(&mut self, event: RunEvent) {
        self.open = false;
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
        broadcast(&mut self.subscribers, event);
    }
}

/// Shared log handle. Cheap to borrow from any worker; every append is a single critical
/// section, so lines from concurrent workers never interleave.
#[derive(Debug)]
pub struct RunLog {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl RunLog {
    /// Open (creating if needed) the log file at `path` in append mode.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let inner = Inner { file: Some(file), ..Inner::default() };
        Ok(Self { path: Some(path), inner: Mutex::new(inner) })
    }

    /// A log that is not persisted; lines still reach subscribers and the `log` facade.
    pub fn in_memory() -> Self {
        Self { path: None, inner: Mutex::new(Inner::default()) }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Register a subscriber. It receives every event appended after this call.
    pub fn subscribe(&self) -> Receiver<RunEvent> {
        let (tx, rx) = channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    /// Open a new run with `message` as its first line.
    ///
    /// Lines appended through the returned handle are kept only until the run is closed by
    /// [`finish`](Self::finish) or [`fail`](Self::fail), or superseded by the next `begin`.
    pub fn begin(self: &Arc<Self>, message: impl AsRef<str>) -> RunSession {
        let mut inner = self.inner.lock();
        inner.session += 1;
        inner.open = true;
        inner.push(Level::Info, message.as_ref());
        RunSession { log: Arc::clone(self), id: inner.session }
    }

    pub fn append(&self, level: Level, message: impl AsRef<str>) {
        self.inner.lock().push(level, message.as_ref());
    }

    fn append_in(&self, session: u64, level: Level, message: &str) {
        let mut inner = self.inner.lock();
        if !inner.open || inner.session != session {
            log::debug!(target: LOG_TARGET, "dropped line from closed run {session}: {message}");
            return;
        }
        inner.push(level, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.append(Level::Info, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.append(Level::Warn, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.append(Level::Error, message);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.append(Level::Debug, message);
    }

    /// Append the closing summary and notify subscribers that the run completed.
    pub fn finish(&self, summary: impl Into<String>) {
        let summary = summary.into();
        let mut inner = self.inner.lock();
        inner.push(Level::Info, &summary);
        inner.close(RunEvent::Finished(summary));
    }

    /// Append the failure reason and notify subscribers that the run aborted.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut inner = self.inner.lock();
        inner.push(Level::Error, &reason);
        inner.close(RunEvent::Failed(reason));
    }

    /// The most recent lines appended through this handle, at most [`HISTORY_LIMIT`].
    pub fn lines(&self) -> Vec<LogLine> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Whether any retained line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.inner.lock().history.iter().any(|l| l.message.contains(needle))
    }
}

/// Append handle for the lines of one run, given to workers.
#[derive(Debug, Clone)]
pub struct RunSession {
    log: Arc<RunLog>,
    id: u64,
}

impl RunSession {
    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log.append_in(self.id, Level::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log.append_in(self.id, Level::Warn, message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log.append_in(self.id, Level::Debug, message.as_ref());
    }
}

fn broadcast(subscribers: &mut Vec<Sender<RunEvent>>, event: RunEvent) {
    subscribers.retain(|tx| tx.send(event.clone()).is_ok());
}

/// Read the last `tail` lines of a persisted log (all lines when `tail` is `None`).
pub fn read_tail(path: &Path, tail: Option<usize>) -> std::io::Result<Vec<String>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    let skip = match tail {
        Some(n) => lines.len().saturating_sub(n),
        None => 0,
    };
    Ok(lines.into_iter().skip(skip).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_appended_and_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("deobf.log");
        let log = RunLog::open(&path).unwrap();
        let rx = log.subscribe();

        log.info("first");
        log.warn("second\nline");
        log.finish("done");

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("[INFO] first"));
        assert!(lines[1].ends_with("[WARN] second line"));
        assert!(lines[2].ends_with("[INFO] done"));

        let events: Vec<RunEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[3], RunEvent::Finished("done".into()));
    }

    #[test]
    fn closed_session_drops_late_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deobf.log");
        let log = Arc::new(RunLog::open(&path).unwrap());
        let rx = log.subscribe();

        let first = log.begin("start one");
        first.info("working");
        log.finish("done one");
        first.warn("straggler");

        let second = log.begin("start two");
        first.warn("older straggler");
        second.info("fresh");

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[2].ends_with("[INFO] done one"));
        assert!(lines[3].ends_with("[INFO] start two"));
        assert!(lines[4].ends_with("[INFO] fresh"));
        assert!(!text.contains("straggler"));
        assert!(log.contains("fresh"));

        let events: Vec<RunEvent> = rx.try_iter().collect();
        assert_eq!(events[3], RunEvent::Finished("done one".into()));
        assert_eq!(events.len(), 6);
    }

    #[test]
    fn history_keeps_only_recent_lines() {
        let log = RunLog::in_memory();
        for i in 0..HISTORY_LIMIT + 10 {
            log.debug(format!("line {i}"));
        }
        let lines = log.lines();
        assert_eq!(lines.len(), HISTORY_LIMIT);
        assert_eq!(lines[0].message, "line 10");
        assert!(log.contains(&format!("line {}", HISTORY_LIMIT + 9)));
    }

    #[test]
    fn reopening_appends_instead_of_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deobf.log");
        RunLog::open(&path).unwrap().info("one");
        RunLog::open(&path).unwrap().info("two");
        let tail = read_tail(&path, Some(1)).unwrap();
        assert_eq!(tail.len(), 1);
        assert!(tail[0].ends_with("two"));
        assert_eq!(read_tail(&path, None).unwrap().len(), 2);
    }
}
