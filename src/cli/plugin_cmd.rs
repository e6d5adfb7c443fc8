//! Plugin management commands

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Subcommand;

use super::app::{exit_status, load_host};
use super::output::Output;
use crate::config::{ConfigError, HostConfig, PluginEntry};
use crate::domain::{Phase, CONFIGURATION_ERROR_CODE, DEFAULT_PLUGIN_KIND};

#[derive(Subcommand)]
pub enum PluginCommands {
    /// List configured plugins and the ones that failed to load
    List,

    /// Register a plugin in the host config
    Add {
        /// Unique plugin name
        #[arg(long)]
        name: String,

        /// Plugin config file, relative to the host config's directory
        #[arg(long)]
        config_path: PathBuf,

        /// Plugin kind
        #[arg(long, default_value = DEFAULT_PLUGIN_KIND)]
        kind: String,
    },
}

pub fn run(
    cmd: PluginCommands,
    config_path: &Path,
    log_file: Option<&Path>,
    output: &Output,
) -> Result<u8> {
    match cmd {
        PluginCommands::List => list_plugins(config_path, log_file, output),
        PluginCommands::Add {
            name,
            config_path: plugin_path,
            kind,
        } => add_plugin(config_path, PluginEntry::new(name, plugin_path).with_kind(kind), output),
    }
}

fn list_plugins(config_path: &Path, log_file: Option<&Path>, output: &Output) -> Result<u8> {
    let host = load_host(config_path, log_file)?;

    if !host.is_loaded() {
        output.error(&format!(
            "Host config could not be loaded: {}",
            config_path.display()
        ));
        return Ok(exit_status(CONFIGURATION_ERROR_CODE));
    }

    let plugins = host.plugins();
    let failures = host.load_failures();

    if output.is_json() {
        let items: Vec<_> = plugins.iter().map(|p| p.descriptor.as_ref()).collect();
        output.data(&serde_json::json!({
            "plugins": items,
            "failures": failures,
        }));
        return Ok(0);
    }

    if plugins.is_empty() {
        println!("No plugins loaded.");
        println!();
        println!("Register one with:");
        println!("  prepost plugins add --name <NAME> --config-path <PATH>");
    } else {
        println!("Loaded plugins:");
        println!(
            "{:<20} {:<10} {:>10} {:<9} {}",
            "NAME", "KIND", "TIMEOUT", "CONTINUE", "SCRIPTS"
        );
        println!("{}", "-".repeat(80));
        for plugin in plugins {
            let d = &plugin.descriptor;
            println!(
                "{:<20} {:<10} {:>9}s {:<9} {} / {}",
                d.name,
                d.kind,
                d.timeout.as_secs(),
                d.continue_on_failure,
                d.script(Phase::Pre).path.display(),
                d.script(Phase::Post).path.display()
            );
        }
    }

    if !failures.is_empty() {
        println!();
        println!("Not loaded:");
        for failure in failures {
            println!("  {}: {}", failure.plugin_name, failure.reason);
        }
    }

    Ok(0)
}

fn add_plugin(config_path: &Path, entry: PluginEntry, output: &Output) -> Result<u8> {
    let mut config = match HostConfig::load(config_path) {
        Ok(config) => config,
        Err(ConfigError::NotFound(_)) => {
            output.verbose_ctx("plugins", "Host config not found, creating a new one");
            HostConfig::default()
        }
        Err(e) => return Err(e.into()),
    };

    let name = entry.name.clone();
    config.add_plugin(entry)?;
    config.save(config_path)?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "added": name,
            "config": config_path.display().to_string(),
            "plugins": config.plugins.len(),
        }));
    } else {
        output.success(&format!(
            "Added plugin '{}' to {}",
            name,
            config_path.display()
        ));
    }

    Ok(0)
}
