use crate::config::types::{Config, ExhaustedPolicy, PartitionEntry};
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use gleaner::config::load_config;
///
/// let config = load_config(Path::new("gleaner.toml")).unwrap();
/// println!("Item concurrency: {}", config.crawler.item_concurrency);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// This is used to correlate crawl runs with the configuration they ran under.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Applies `GLEANER_*` environment overrides on top of a loaded configuration
///
/// `lookup` abstracts the environment so callers can pass `std::env::var(..).ok()`
/// or a fixed map. The result is re-validated.
///
/// | Variable | Effect |
/// |----------|--------|
/// | `GLEANER_PARTITIONS` | Comma-separated partition names, in crawl order |
/// | `GLEANER_PAGE_START` | First page of every partition |
/// | `GLEANER_PAGE_END` | Last page of every partition |
/// | `GLEANER_PAGE_CONCURRENCY` | Page pool size |
/// | `GLEANER_ITEM_CONCURRENCY` | Item pool size |
/// | `GLEANER_MAX_ATTEMPTS` | Detail attempts per item |
/// | `GLEANER_LENIENT` | Persist exhausted items with sentinels |
/// | `GLEANER_OUTPUT` | Canonical state document path |
/// | `GLEANER_SYNC_TOKEN` | Credential for the sync hook |
pub fn apply_env_overrides<F>(mut config: Config, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("GLEANER_PARTITIONS") {
        let names: Vec<&str> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if names.is_empty() {
            return Err(env_error("GLEANER_PARTITIONS", &value, "no partition names"));
        }

        // Keep known bounds for partitions that are already configured
        let known = config.effective_partitions();
        config.partitions = names
            .iter()
            .map(|name| {
                known
                    .iter()
                    .find(|p| p.name == *name)
                    .cloned()
                    .unwrap_or_else(|| PartitionEntry::new(name, 1, None))
            })
            .collect();
    }

    if let Some(value) = lookup("GLEANER_PAGE_START") {
        let start: u32 = parse_env("GLEANER_PAGE_START", &value)?;
        config.partitions = config
            .effective_partitions()
            .into_iter()
            .map(|mut p| {
                p.first_page = start;
                p
            })
            .collect();
    }

    if let Some(value) = lookup("GLEANER_PAGE_END") {
        let end: u32 = parse_env("GLEANER_PAGE_END", &value)?;
        config.partitions = config
            .effective_partitions()
            .into_iter()
            .map(|mut p| {
                p.last_page = Some(end);
                p
            })
            .collect();
    }

    if let Some(value) = lookup("GLEANER_PAGE_CONCURRENCY") {
        config.crawler.page_concurrency = parse_env("GLEANER_PAGE_CONCURRENCY", &value)?;
    }

    if let Some(value) = lookup("GLEANER_ITEM_CONCURRENCY") {
        config.crawler.item_concurrency = parse_env("GLEANER_ITEM_CONCURRENCY", &value)?;
    }

    if let Some(value) = lookup("GLEANER_MAX_ATTEMPTS") {
        config.fetch.max_attempts = parse_env("GLEANER_MAX_ATTEMPTS", &value)?;
    }

    if let Some(value) = lookup("GLEANER_LENIENT") {
        config.fetch.on_exhausted = if parse_bool("GLEANER_LENIENT", &value)? {
            ExhaustedPolicy::Lenient
        } else {
            ExhaustedPolicy::Drop
        };
    }

    if let Some(value) = lookup("GLEANER_OUTPUT") {
        config.output.state_path = PathBuf::from(value);
    }

    if let Some(value) = lookup("GLEANER_SYNC_TOKEN") {
        if !value.trim().is_empty() {
            config.sync.token = Some(value);
        }
    }

    validate(&config)?;
    Ok(config)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| env_error(key, value, &e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(env_error(key, value, "expected a boolean")),
    }
}

fn env_error(key: &str, value: &str, message: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
        message: message.to_string(),
    }
}
