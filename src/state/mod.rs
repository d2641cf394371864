//! State module for tracking crawl activity
//!
//! # Components
//!
//! - `ActivityHandle`: Shared handle to what the crawler is doing right now
//! - `ActivityGuard`: Returns the activity to idle when the operation ends
//! - `LogEntry`: One line of the bounded, user-facing activity log

mod activity;

// Re-export main types
pub use activity::{
    ActivityGuard, ActivityHandle, ActivitySnapshot, ActivityState, LogEntry, LogLevel,
    DEFAULT_LOG_CAPACITY,
};
