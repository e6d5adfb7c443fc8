//! Plugin registry and loader
//!
//! Plugin implementations are selected by a `kind` key from configuration.
//! The built-in `script` kind runs shell scripts through [`ScriptRunner`];
//! embedders can register further kinds. Loading is soft: a plugin whose
//! config is missing, malformed, or names an unknown kind is logged and
//! dropped while the rest still load.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::runner::ScriptRunner;
use crate::config::{ConfigError, ConfigSource, PluginEntry};
use crate::domain::{LoadFailure, Phase, PluginDescriptor, RunOutcome, DEFAULT_PLUGIN_KIND};
use crate::logging::{LogLevel, Logger};

/// Capability every plugin kind provides
pub trait HookPlugin: Send + Sync {
    /// Runs the pre-backup hook
    fn run_pre(&self, descriptor: &PluginDescriptor, logger: &dyn Logger) -> RunOutcome;

    /// Runs the post-backup hook
    fn run_post(&self, descriptor: &PluginDescriptor, logger: &dyn Logger) -> RunOutcome;

    fn run(&self, phase: Phase, descriptor: &PluginDescriptor, logger: &dyn Logger) -> RunOutcome {
        match phase {
            Phase::Pre => self.run_pre(descriptor, logger),
            Phase::Post => self.run_post(descriptor, logger),
        }
    }
}

/// The built-in plugin: runs the descriptor's scripts as child processes
#[derive(Debug, Clone, Default)]
pub struct ScriptPlugin {
    runner: ScriptRunner,
}

impl ScriptPlugin {
    pub fn new(runner: ScriptRunner) -> Self {
        Self { runner }
    }
}

impl HookPlugin for ScriptPlugin {
    fn run_pre(&self, descriptor: &PluginDescriptor, logger: &dyn Logger) -> RunOutcome {
        self.runner.run(descriptor, Phase::Pre, logger)
    }

    fn run_post(&self, descriptor: &PluginDescriptor, logger: &dyn Logger) -> RunOutcome {
        self.runner.run(descriptor, Phase::Post, logger)
    }
}

/// Builds a plugin implementation for a descriptor
pub type PluginFactory = Arc<dyn Fn(&PluginDescriptor) -> Arc<dyn HookPlugin> + Send + Sync>;

/// Why a single plugin was dropped during loading
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unknown plugin kind '{kind}'")]
    UnknownKind { kind: String },

    #[error("plugin name is already registered")]
    DuplicateName,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A plugin ready to run
#[derive(Clone)]
pub struct LoadedPlugin {
    pub descriptor: Arc<PluginDescriptor>,
    pub hook: Arc<dyn HookPlugin>,
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Everything a successful load produced
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub global_timeout: Duration,

    /// Loaded plugins in registration order
    pub plugins: Vec<LoadedPlugin>,

    /// Plugins that were dropped, in registration order
    pub failures: Vec<LoadFailure>,
}

/// Maps plugin kinds to implementations
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Creates a registry with no kinds at all
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in `script` kind
    pub fn new() -> Self {
        Self::with_runner(ScriptRunner::new())
    }

    /// Creates a registry whose `script` kind uses `runner`
    pub fn with_runner(runner: ScriptRunner) -> Self {
        let mut registry = Self::empty();
        let plugin: Arc<dyn HookPlugin> = Arc::new(ScriptPlugin::new(runner));
        registry.register(DEFAULT_PLUGIN_KIND, move |_| Arc::clone(&plugin));
        registry
    }

    /// Registers (or replaces) the implementation for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&PluginDescriptor) -> Arc<dyn HookPlugin> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Builds the implementation for a descriptor
    pub fn instantiate(&self, descriptor: &PluginDescriptor) -> Result<Arc<dyn HookPlugin>, LoadError> {
        self.factories
            .get(&descriptor.kind)
            .map(|factory| factory(descriptor))
            .ok_or_else(|| LoadError::UnknownKind {
                kind: descriptor.kind.clone(),
            })
    }

    /// Loads every plugin listed by `source`
    ///
    /// Only a failure to read the host config itself is an error; individual
    /// plugin failures are logged and reported in [`LoadReport::failures`].
    pub fn load(&self, source: &dyn ConfigSource, logger: &dyn Logger) -> Result<LoadReport, ConfigError> {
        let host = source.host_config()?;
        let base_dir = source.base_dir();

        let mut seen = HashSet::new();
        let mut plugins = Vec::new();
        let mut failures = Vec::new();

        for entry in &host.plugins {
            let loaded = if seen.insert(entry.name.clone()) {
                self.load_one(source, entry, &base_dir)
            } else {
                Err(LoadError::DuplicateName)
            };

            match loaded {
                Ok(plugin) => {
                    tracing::debug!(plugin = %entry.name, kind = %entry.kind, "plugin loaded");
                    plugins.push(plugin);
                }
                Err(e) => {
                    logger.log(
                        &format!("Error in loading plugin {}: {}", entry.name, e),
                        true,
                        LogLevel::Error,
                    );
                    failures.push(LoadFailure {
                        plugin_name: entry.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(LoadReport {
            global_timeout: host.global_timeout(),
            plugins,
            failures,
        })
    }

    fn load_one(
        &self,
        source: &dyn ConfigSource,
        entry: &PluginEntry,
        base_dir: &std::path::Path,
    ) -> Result<LoadedPlugin, LoadError> {
        let config = source.plugin_config(entry)?;
        let descriptor = config.into_descriptor(entry, base_dir)?;
        let hook = self.instantiate(&descriptor)?;

        Ok(LoadedPlugin {
            descriptor: Arc::new(descriptor),
            hook,
        })
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
