//! # Configuration
//!
//! The configuration collaborator: a host file listing plugins and the
//! global phase timeout, plus one file per plugin describing its scripts and
//! policy.
//!
//! ## Formats
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Host config | TOML | `--config`, `$PREPOST_CONFIG`, or the platform config dir |
//! | Plugin config | JSON (`.json`) or TOML | `config_path` of each plugin entry, relative to the host config |
//!
//! ## Example
//!
//! ```toml
//! timeout_minutes = 10
//!
//! [[plugins]]
//! name = "oracle"
//! config_path = "oracle.json"
//! ```
//!
//! ## Key Types
//!
//! - [`HostConfig`] - Global timeout and ordered plugin entries
//! - [`PluginConfig`] - Scripts, parameters, timeout and policy of one plugin
//! - [`ConfigSource`] - Where the registry reads both from

mod host;
mod plugin;
mod source;

use std::path::PathBuf;

use thiserror::Error;

pub use host::{HostConfig, PluginEntry};
pub use plugin::PluginConfig;
pub use source::{ConfigSource, FileConfigSource, MemoryConfigSource};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
