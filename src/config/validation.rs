use crate::config::types::{
    Config, CrawlConfig, ExportConfig, FetcherConfig, ForumConfig, QuoteConfig, StorageConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_forum_config(&config.forum)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_quote_config(&config.quotes)?;
    validate_crawl_config(&config.crawl)?;
    validate_export_config(&config.export)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates the forum section
fn validate_forum_config(config: &ForumConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url '{}' must use http or https",
            config.base_url
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url '{}' has no host",
            config.base_url
        )));
    }

    for (name, id) in [
        ("complete-forum-id", &config.complete_forum_id),
        ("incomplete-forum-id", &config.incomplete_forum_id),
        ("comms-forum-id", &config.comms_forum_id),
    ] {
        validate_forum_id(name, id)?;
    }

    for id in &config.excluded_forum_ids {
        validate_forum_id("excluded-forum-ids", id)?;
    }

    if config.cooldown_title_marker.trim().is_empty() {
        return Err(ConfigError::Validation(
            "cooldown-title-marker cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Forum ids are the numeric `showforum=` values
fn validate_forum_id(field: &str, id: &str) -> Result<(), ConfigError> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::Validation(format!(
            "{} must be numeric, got '{}'",
            field, id
        )));
    }
    Ok(())
}

/// Validates fetcher configuration
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_requests < 1 || config.max_concurrent_requests > 100 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-requests must be between 1 and 100, got {}",
            config.max_concurrent_requests
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    // Half-configured credentials are almost always a typo
    if config.bot_username.is_some() != config.bot_password.is_some() {
        return Err(ConfigError::Validation(
            "bot-username and bot-password must be set together".to_string(),
        ));
    }

    if let Some(command) = &config.render_command {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(ConfigError::Validation(
                "render-command must name a program".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates quote filters
fn validate_quote_config(config: &QuoteConfig) -> Result<(), ConfigError> {
    if config.min_words < 1 {
        return Err(ConfigError::Validation(format!(
            "min-words must be >= 1, got {}",
            config.min_words
        )));
    }

    if config.max_length < 20 {
        return Err(ConfigError::Validation(format!(
            "max-length must be >= 20, got {}",
            config.max_length
        )));
    }

    Ok(())
}

/// Validates crawl orchestration limits
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.max_consecutive_misses < 1 {
        return Err(ConfigError::Validation(
            "max-consecutive-misses must be >= 1".to_string(),
        ));
    }

    if config.max_user_id < 1 {
        return Err(ConfigError::Validation(
            "max-user-id must be >= 1".to_string(),
        ));
    }

    for (name, size) in [
        ("search-page-size", config.search_page_size),
        ("thread-page-size", config.thread_page_size),
        ("member-page-size", config.member_page_size),
    ] {
        if size == 0 {
            return Err(ConfigError::Validation(format!("{} must be >= 1", name)));
        }
    }

    Ok(())
}

/// Validates export protocol bounds
fn validate_export_config(config: &ExportConfig) -> Result<(), ConfigError> {
    if config.admin_username.is_some() != config.admin_password.is_some() {
        return Err(ConfigError::Validation(
            "admin-username and admin-password must be set together".to_string(),
        ));
    }

    if config.table_parts.is_empty() {
        return Err(ConfigError::Validation(
            "table-parts cannot be empty".to_string(),
        ));
    }

    if config.max_pages_per_part < 1 {
        return Err(ConfigError::Validation(
            "max-pages-per-part must be >= 1".to_string(),
        ));
    }

    if config.poll_schedule_ms.is_empty() {
        return Err(ConfigError::Validation(
            "poll-schedule-ms cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
