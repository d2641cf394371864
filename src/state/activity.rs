//! Crawl activity tracking
//!
//! This module handles:
//! - Idle/active transitions, nested so overlapping operations stay active
//! - The current step description of the running operation
//! - A bounded log of recent events, mirrored to `tracing`

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Number of log entries kept by default
pub const DEFAULT_LOG_CAPACITY: usize = 200;

/// Severity of an activity log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Done,
    Warn,
    Error,
}

/// One timestamped line of the activity log
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// What the crawler is doing right now
///
/// Ephemeral: lives only in memory and starts idle on every process start.
#[derive(Debug)]
pub struct ActivityState {
    active: bool,
    description: Option<String>,
    character_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    /// Nesting depth of running operations; the state is idle at zero
    depth: u32,
    log: VecDeque<LogEntry>,
    capacity: usize,
}

impl ActivityState {
    pub fn new(capacity: usize) -> Self {
        Self {
            active: false,
            description: None,
            character_id: None,
            started_at: None,
            depth: 0,
            log: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info | LogLevel::Done => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }

        while self.log.len() >= self.capacity {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry {
            at: Utc::now(),
            level,
            message,
        });
    }

    fn begin(&mut self, description: &str, character_id: Option<&str>) {
        if self.depth == 0 {
            self.active = true;
            self.started_at = Some(Utc::now());
            self.character_id = character_id.map(str::to_string);
        } else if character_id.is_some() {
            self.character_id = character_id.map(str::to_string);
        }
        self.depth += 1;
        self.description = Some(description.to_string());
        self.push(LogLevel::Info, description.to_string());
    }

    fn finish(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth > 0 {
            return;
        }

        let message = match (&self.description, self.started_at) {
            (Some(description), Some(started)) => {
                let elapsed = (Utc::now() - started).num_seconds();
                format!("Finished: {} ({}s)", description, elapsed)
            }
            (Some(description), None) => format!("Finished: {}", description),
            _ => "Finished".to_string(),
        };

        self.active = false;
        self.description = None;
        self.character_id = None;
        self.started_at = None;
        self.push(LogLevel::Done, message);
    }
}

impl Default for ActivityState {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Read-only copy of the activity state
#[derive(Debug, Clone, Serialize)]
pub struct ActivitySnapshot {
    pub active: bool,
    pub description: Option<String>,
    pub character_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub log: Vec<LogEntry>,
}

/// Shared handle to the process-wide activity state
///
/// Cloning is cheap; all clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct ActivityHandle {
    inner: Arc<Mutex<ActivityState>>,
}

impl ActivityHandle {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ActivityState::new(capacity))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ActivityState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks the start of a multi-step operation
    ///
    /// The state returns to idle when the last outstanding guard is dropped.
    /// Nested operations overwrite the description without leaving the active
    /// state.
    pub fn begin(&self, description: impl AsRef<str>, character_id: Option<&str>) -> ActivityGuard {
        self.lock().begin(description.as_ref(), character_id);
        ActivityGuard {
            handle: self.clone(),
        }
    }

    /// Replaces the current description of a running operation
    pub fn step(&self, description: impl Into<String>) {
        let mut state = self.lock();
        if state.active {
            let description = description.into();
            state.description = Some(description.clone());
            state.push(LogLevel::Info, description);
        }
    }

    /// Appends a diagnostic message to the log
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.lock().push(level, message.into());
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        let state = self.lock();
        ActivitySnapshot {
            active: state.active,
            description: state.description.clone(),
            character_id: state.character_id.clone(),
            started_at: state.started_at,
            log: state.log.iter().cloned().collect(),
        }
    }
}

/// Returns the activity to idle when dropped
#[must_use = "the activity ends when the guard is dropped"]
pub struct ActivityGuard {
    handle: ActivityHandle,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.handle.lock().finish();
    }
}
