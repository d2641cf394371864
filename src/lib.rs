//! Forum-Ripple: a polite activity crawler for server-rendered forums
//!
//! This crate incrementally extracts characters, discussion threads and authored
//! dialogue quotes from a forum that only exposes HTML pages and, optionally, an
//! administrative database export. Crawls are sequenced so that the remote
//! platform's flood protection is never tripped.

pub mod config;
pub mod crawler;
pub mod export;
pub mod parser;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Forum-Ripple operations
#[derive(Debug, Error)]
pub enum ForumError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Crawl error: {0}")]
    Crawl(#[from] crawler::CrawlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Forum-Ripple operations
pub type Result<T> = std::result::Result<T, ForumError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Crawler, OperationReport};
pub use parser::ThreadCategory;
pub use state::ActivityHandle;
