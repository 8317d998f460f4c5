//! Configuration module for Gleaner
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and layering `GLEANER_*` environment overrides on top.
//!
//! # Example
//!
//! ```no_run
//! use gleaner::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("gleaner.toml")).unwrap();
//! println!("Crawling {} partitions", config.partition_order().len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BackoffKind, BreakerConfig, Config, CrawlerConfig, ExhaustedPolicy, FetchConfig,
    IdentitySource, OutputConfig, PartitionEntry, QualityConfig, RendererConfig, SiteConfig,
    SyncConfig,
};

// Re-export parser functions
pub use parser::{apply_env_overrides, compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;

pub(crate) use types::file_stem;
