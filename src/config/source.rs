//! Configuration sources
//!
//! The registry never touches the filesystem directly; it asks a
//! [`ConfigSource`] for the host config and for each plugin's config.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::host::{HostConfig, PluginEntry};
use super::plugin::PluginConfig;
use super::ConfigError;

/// Supplies the host config and per-plugin configs
pub trait ConfigSource {
    /// Loads the host config; failure here means nothing can run
    fn host_config(&self) -> Result<HostConfig, ConfigError>;

    /// Loads the config of one plugin entry
    fn plugin_config(&self, entry: &PluginEntry) -> Result<PluginConfig, ConfigError>;

    /// Directory relative script paths are resolved against
    fn base_dir(&self) -> PathBuf;

    /// Human-readable location used in log lines
    fn describe(&self) -> String;
}

/// Reads configs from disk
///
/// Plugin config paths are relative to the host config's directory.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn host_config(&self) -> Result<HostConfig, ConfigError> {
        HostConfig::load(&self.path)
    }

    fn plugin_config(&self, entry: &PluginEntry) -> Result<PluginConfig, ConfigError> {
        let path = self.resolve(&entry.config_path);
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        PluginConfig::parse(&content, PluginConfig::is_json_path(&path))
    }

    fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Holds configs in memory, keyed by plugin name
///
/// A host config of `None` behaves like a missing root config file.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigSource {
    host: Option<HostConfig>,
    plugins: HashMap<String, PluginConfig>,
    base_dir: PathBuf,
}

impl MemoryConfigSource {
    pub fn new(host: HostConfig) -> Self {
        Self {
            host: Some(host),
            plugins: HashMap::new(),
            base_dir: PathBuf::from("/"),
        }
    }

    /// A source whose root config is missing
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, name: impl Into<String>, config: PluginConfig) -> Self {
        self.plugins.insert(name.into(), config);
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }
}

impl ConfigSource for MemoryConfigSource {
    fn host_config(&self) -> Result<HostConfig, ConfigError> {
        let host = self
            .host
            .clone()
            .ok_or_else(|| ConfigError::NotFound(PathBuf::from("<memory>")))?;
        host.validate()?;
        Ok(host)
    }

    fn plugin_config(&self, entry: &PluginEntry) -> Result<PluginConfig, ConfigError> {
        self.plugins
            .get(&entry.name)
            .cloned()
            .ok_or_else(|| ConfigError::NotFound(entry.config_path.clone()))
    }

    fn base_dir(&self) -> PathBuf {
        self.base_dir.clone()
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_source_reads_relative_plugin_config() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "[[plugins]]\nname = \"db\"\nconfig_path = \"db.json\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("db.json"),
            r#"{"preScriptLocation": "pre.sh", "postScriptLocation": "post.sh"}"#,
        )
        .unwrap();

        let source = FileConfigSource::new(dir.path().join("config.toml"));
        let host = source.host_config().unwrap();
        let plugin = source.plugin_config(&host.plugins[0]).unwrap();

        assert_eq!(plugin.pre_script, PathBuf::from("pre.sh"));
        assert_eq!(source.base_dir(), dir.path());
    }

    #[test]
    fn file_source_missing_plugin_config() {
        let dir = TempDir::new().unwrap();
        let source = FileConfigSource::new(dir.path().join("config.toml"));

        let err = source
            .plugin_config(&PluginEntry::new("db", "db.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn memory_source_missing_root() {
        let source = MemoryConfigSource::missing();
        assert!(matches!(source.host_config(), Err(ConfigError::NotFound(_))));
    }
}
