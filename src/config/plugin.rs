//! Per-plugin configuration
//!
//! Accepts both the snake_case keys and the legacy camelCase keys
//! (`preScriptLocation`, `continueBackupOnFailure`, ...), so older plugin
//! files load unchanged.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::host::PluginEntry;
use super::ConfigError;
use crate::domain::{PhaseScript, PluginDescriptor, ScriptParam};

/// Default per-invocation timeout in minutes
const DEFAULT_TIMEOUT_MINUTES: u64 = 10;

/// Scripts, parameters and policy of one plugin as written on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Optional; must match the host entry when present
    #[serde(default, alias = "pluginName", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default = "default_timeout_minutes", alias = "timeout")]
    pub timeout_minutes: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    #[serde(default = "default_true", alias = "continueBackupOnFailure")]
    pub continue_on_failure: bool,

    #[serde(alias = "preScriptLocation")]
    pub pre_script: PathBuf,

    #[serde(alias = "postScriptLocation")]
    pub post_script: PathBuf,

    #[serde(default, alias = "preScriptParams")]
    pub pre_params: Vec<ScriptParam>,

    #[serde(default, alias = "postScriptParams")]
    pub post_params: Vec<ScriptParam>,

    #[serde(default, alias = "preScriptNoOfRetries")]
    pub pre_retries: u32,

    #[serde(default, alias = "postScriptNoOfRetries")]
    pub post_retries: u32,

    /// Program prepended to the script path; empty runs the script directly
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,
}

fn default_timeout_minutes() -> u64 {
    DEFAULT_TIMEOUT_MINUTES
}

fn default_true() -> bool {
    true
}

fn default_interpreter() -> Vec<String> {
    vec!["sh".to_string()]
}

impl PluginConfig {
    /// Parses plugin config text; `json` selects JSON over TOML
    pub fn parse(content: &str, json: bool) -> Result<Self, ConfigError> {
        if json {
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }

    /// Returns true if the file should be read as JSON
    pub fn is_json_path(path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }

    pub fn timeout(&self) -> Duration {
        match self.timeout_seconds {
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_secs(self.timeout_minutes.saturating_mul(60)),
        }
    }

    /// Validates the config and resolves it into a descriptor for `entry`
    ///
    /// Relative script paths are resolved against `base_dir`.
    pub fn into_descriptor(
        self,
        entry: &PluginEntry,
        base_dir: &Path,
    ) -> Result<PluginDescriptor, ConfigError> {
        if let Some(name) = &self.name {
            if name != &entry.name {
                return Err(ConfigError::Invalid(format!(
                    "plugin config names '{}' but is registered as '{}'",
                    name, entry.name
                )));
            }
        }
        if self.pre_script.as_os_str().is_empty() || self.post_script.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "plugin '{}' must define both pre and post scripts",
                entry.name
            )));
        }
        let timeout = self.timeout();
        if timeout.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "plugin '{}' timeout must be positive",
                entry.name
            )));
        }

        let pre = PhaseScript::new(resolve(base_dir, &self.pre_script))
            .with_params(self.pre_params)
            .with_retries(self.pre_retries);
        let post = PhaseScript::new(resolve(base_dir, &self.post_script))
            .with_params(self.post_params)
            .with_retries(self.post_retries);

        Ok(PluginDescriptor::new(&entry.name, &pre.path, &post.path)
            .with_kind(&entry.kind)
            .with_pre(pre)
            .with_post(post)
            .with_timeout(timeout)
            .with_continue_on_failure(self.continue_on_failure)
            .with_interpreter(self.interpreter))
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
