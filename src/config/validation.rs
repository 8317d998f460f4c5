use crate::config::types::{
    BreakerConfig, Config, CrawlerConfig, FetchConfig, PartitionEntry, QualityConfig,
    RendererConfig, SiteConfig,
};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_fetch_config(&config.fetch)?;
    validate_quality_config(&config.quality)?;
    validate_breaker_config(&config.breaker)?;
    validate_renderer_config(&config.renderer)?;
    validate_site_config(&config.site)?;
    validate_partitions(&config.effective_partitions())?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.page_concurrency < 1 || config.page_concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "page_concurrency must be between 1 and 64, got {}",
            config.page_concurrency
        )));
    }

    if config.item_concurrency < 1 || config.item_concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "item_concurrency must be between 1 and 256, got {}",
            config.item_concurrency
        )));
    }

    if config.scan_attempts < 1 {
        return Err(ConfigError::Validation(
            "scan_attempts must be >= 1".to_string(),
        ));
    }

    if config.checkpoint_every < 1 {
        return Err(ConfigError::Validation(
            "checkpoint_every must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 || config.max_attempts > 20 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be between 1 and 20, got {}",
            config.max_attempts
        )));
    }

    Ok(())
}

fn validate_quality_config(config: &QualityConfig) -> Result<(), ConfigError> {
    if !(config.max_failure_ratio > 0.0 && config.max_failure_ratio <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "max_failure_ratio must be in (0, 1], got {}",
            config.max_failure_ratio
        )));
    }
    Ok(())
}

fn validate_breaker_config(config: &BreakerConfig) -> Result<(), ConfigError> {
    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.success_floor) {
        return Err(ConfigError::Validation(format!(
            "success_floor must be in [0, 1], got {}",
            config.success_floor
        )));
    }

    if config.window < 1 {
        return Err(ConfigError::Validation("window must be >= 1".to_string()));
    }

    Ok(())
}

fn validate_renderer_config(config: &RendererConfig) -> Result<(), ConfigError> {
    if config.recycle_after < 1 {
        return Err(ConfigError::Validation(
            "recycle_after must be >= 1".to_string(),
        ));
    }

    if config.max_sessions == Some(0) {
        return Err(ConfigError::Validation(
            "max_sessions must be >= 1 when set".to_string(),
        ));
    }

    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user_agents cannot contain empty entries".to_string(),
        ));
    }

    Ok(())
}

fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    if !config.list_url.contains("{page}") {
        return Err(ConfigError::Validation(format!(
            "list_url must contain a {{page}} placeholder, got '{}'",
            config.list_url
        )));
    }

    let sample = config
        .list_url
        .replace("{page}", "1")
        .replace("{partition}", "x");
    Url::parse(&sample)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid list_url '{}': {}", config.list_url, e)))?;

    if config.detail_link_patterns.is_empty() {
        return Err(ConfigError::Validation(
            "detail_link_patterns cannot be empty".to_string(),
        ));
    }

    for selector in [
        &config.breadcrumb_item_selector,
        &config.breadcrumb_position_selector,
        &config.breadcrumb_name_selector,
        &config.attribution_selector,
    ] {
        validate_selector(selector)?;
    }

    if config.anonymous_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "anonymous_name cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_partitions(partitions: &[PartitionEntry]) -> Result<(), ConfigError> {
    if partitions.is_empty() {
        return Err(ConfigError::Validation(
            "at least one partition is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for entry in partitions {
        if entry.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "partition names cannot be empty".to_string(),
            ));
        }

        if !seen.insert(entry.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "partition '{}' is listed more than once",
                entry.name
            )));
        }

        if entry.first_page < 1 {
            return Err(ConfigError::Validation(format!(
                "partition '{}' must start at page 1 or later",
                entry.name
            )));
        }

        if let Some(last) = entry.last_page {
            if last < entry.first_page {
                return Err(ConfigError::Validation(format!(
                    "partition '{}' has last_page {} before first_page {}",
                    entry.name, last, entry.first_page
                )));
            }
        }
    }

    Ok(())
}

fn validate_output_config(config: &crate::config::types::OutputConfig) -> Result<(), ConfigError> {
    if config.state_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "state_path cannot be empty".to_string(),
        ));
    }

    if config.effective_backup_path() == config.state_path {
        return Err(ConfigError::Validation(
            "backup_path must differ from state_path".to_string(),
        ));
    }

    if config.snapshot_every < 1 {
        return Err(ConfigError::Validation(
            "snapshot_every must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector {
            selector: selector.to_string(),
            message: e.to_string(),
        })
}
