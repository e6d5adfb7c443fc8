//! Host configuration: global phase timeout and the ordered plugin list

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::domain::DEFAULT_PLUGIN_KIND;

/// Default global phase timeout in minutes
const DEFAULT_TIMEOUT_MINUTES: u64 = 10;

/// One plugin listed in the host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEntry {
    /// Plugin identity, unique within the host config
    pub name: String,

    /// Registry key of the implementation
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Path to the plugin's own configuration file
    pub config_path: PathBuf,
}

impl PluginEntry {
    pub fn new(name: impl Into<String>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: default_kind(),
            config_path: config_path.into(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

fn default_kind() -> String {
    DEFAULT_PLUGIN_KIND.to_string()
}

/// Top-level configuration of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Global phase timeout in minutes
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,

    /// Finer-grained override of `timeout_minutes`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    /// Plugins in registration order
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

fn default_timeout_minutes() -> u64 {
    DEFAULT_TIMEOUT_MINUTES
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            timeout_seconds: None,
            plugins: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Returns the default host config path under the platform config dir
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "prepost", "prepost")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parses a host config from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: HostConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a host config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    /// Checks timeouts and plugin entry shape
    ///
    /// Duplicate names are not rejected here; the registry drops the later
    /// entry so the earlier plugins still run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global_timeout().is_zero() {
            return Err(ConfigError::Invalid("global timeout must be positive".to_string()));
        }

        for (i, entry) in self.plugins.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("plugin #{} has an empty name", i)));
            }
        }

        Ok(())
    }

    /// Global phase timeout
    pub fn global_timeout(&self) -> Duration {
        match self.timeout_seconds {
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_secs(self.timeout_minutes.saturating_mul(60)),
        }
    }

    /// Returns the names of entries listed more than once
    pub fn duplicate_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.plugins
            .iter()
            .filter(|p| !seen.insert(p.name.as_str()))
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Appends a plugin entry, rejecting a name that is already registered
    pub fn add_plugin(&mut self, entry: PluginEntry) -> Result<(), ConfigError> {
        if entry.name.trim().is_empty() {
            return Err(ConfigError::Invalid("plugin name must not be empty".to_string()));
        }
        if self.plugins.iter().any(|p| p.name == entry.name) {
            return Err(ConfigError::Invalid(format!(
                "plugin '{}' is already registered",
                entry.name
            )));
        }
        self.plugins.push(entry);
        Ok(())
    }

    /// Writes the config atomically (temp file + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize host config")?;
        let temp_path = path.with_extension("toml.tmp");

        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

            file.lock_exclusive()
                .context("Failed to acquire write lock on host config")?;

            let mut writer = BufWriter::new(&file);
            writer
                .write_all(content.as_bytes())
                .context("Failed to write host config")?;
            writer.flush().context("Failed to flush host config")?;
        }

        fs::rename(&temp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_host_config() {
        let toml = r#"
timeout_minutes = 3

[[plugins]]
name = "oracle"
config_path = "oracle.json"

[[plugins]]
name = "mysql"
kind = "script"
config_path = "/etc/prepost/mysql.toml"
"#;

        let config = HostConfig::parse(toml).unwrap();
        assert_eq!(config.global_timeout(), Duration::from_secs(180));
        assert_eq!(config.plugins.len(), 2);
        assert_eq!(config.plugins[0].kind, "script");
        assert_eq!(config.plugins[1].name, "mysql");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = HostConfig::parse("").unwrap();
        assert_eq!(config.global_timeout(), Duration::from_secs(600));
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn seconds_override_minutes() {
        let config = HostConfig::parse("timeout_minutes = 5\ntimeout_seconds = 2").unwrap();
        assert_eq!(config.global_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn huge_minute_timeout_saturates() {
        let config = HostConfig::parse("timeout_minutes = 307445734561825861").unwrap();
        assert_eq!(config.global_timeout(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let err = HostConfig::parse("timeout_seconds = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = HostConfig::parse("timeout_minutes = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = HostConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn duplicate_names_are_reported() {
        let mut config = HostConfig::default();
        config.plugins.push(PluginEntry::new("a", "a.json"));
        config.plugins.push(PluginEntry::new("b", "b.json"));
        config.plugins.push(PluginEntry::new("a", "a2.json"));

        assert_eq!(config.duplicate_names(), vec!["a"]);
    }

    #[test]
    fn add_plugin_and_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = HostConfig::default();
        config.add_plugin(PluginEntry::new("oracle", "oracle.json")).unwrap();
        assert!(config.add_plugin(PluginEntry::new("oracle", "other.json")).is_err());
        config.save(&path).unwrap();

        let loaded = HostConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(!dir.path().join("config.toml.tmp").exists());
    }
}
