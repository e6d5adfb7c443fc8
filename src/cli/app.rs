//! Main CLI application structure

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use super::output::{Output, OutputFormat};
use super::{plugin_cmd, run_cmd};
use crate::config::{FileConfigSource, HostConfig};
use crate::domain::CONFIGURATION_ERROR_CODE;
use crate::logging::{self, FileLogger, Logger, TeeLogger, TracingLogger};
use crate::plugin::PluginHost;

#[derive(Parser)]
#[command(name = "prepost")]
#[command(author, version, about = "Pre/post backup hook orchestration")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Host config file
    #[arg(long, short = 'c', global = true, env = "PREPOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Also append log lines to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the hooks of every configured plugin
    Run {
        /// Phase to run
        #[arg(value_enum)]
        phase: run_cmd::RunTarget,
    },

    /// Manage configured plugins
    #[command(subcommand)]
    Plugins(plugin_cmd::PluginCommands),

    /// Load the configuration without running anything
    Check,
}

/// Main entry point for the CLI
///
/// Returns the process exit code.
pub fn run() -> Result<u8> {
    let cli = Cli::parse();
    let output = Output::new(cli.format, cli.verbose);

    logging::init_tracing(cli.verbose);
    output.verbose("prepost starting");

    let config_path = resolve_config_path(cli.config)?;
    output.verbose_ctx("config", &format!("Using host config: {}", config_path.display()));

    let code = match cli.command {
        Commands::Run { phase } => {
            let host = load_host(&config_path, cli.log_file.as_deref())?;
            run_cmd::run(&host, phase, &output)
        }

        Commands::Plugins(cmd) => {
            plugin_cmd::run(cmd, &config_path, cli.log_file.as_deref(), &output)?
        }

        Commands::Check => {
            let host = load_host(&config_path, cli.log_file.as_deref())?;
            check(&host, &config_path, &output)
        }
    };

    output.verbose(&format!("Command finished with exit code {}", code));
    Ok(code)
}

/// `--config`, then `PREPOST_CONFIG`, then the per-user config directory
fn resolve_config_path(flag: Option<PathBuf>) -> Result<PathBuf> {
    match flag {
        Some(path) => Ok(path),
        None => HostConfig::default_path()
            .context("Could not determine a config directory; pass --config"),
    }
}

/// Builds the host logger from the CLI flags
pub(super) fn build_logger(log_file: Option<&std::path::Path>) -> Result<Arc<dyn Logger>> {
    let tracing_logger: Arc<dyn Logger> = Arc::new(TracingLogger);

    match log_file {
        Some(path) => {
            let file_logger = FileLogger::open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Ok(Arc::new(TeeLogger::new(tracing_logger, Arc::new(file_logger))))
        }
        None => Ok(tracing_logger),
    }
}

/// Creates a host and loads it from the config file
pub(super) fn load_host(
    config_path: &std::path::Path,
    log_file: Option<&std::path::Path>,
) -> Result<PluginHost> {
    let mut host = PluginHost::new(build_logger(log_file)?);
    host.load(&FileConfigSource::new(config_path));
    Ok(host)
}

/// Exit code for a result code that may not fit in a process status
pub(super) fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

fn check(host: &PluginHost, config_path: &std::path::Path, output: &Output) -> u8 {
    if !host.is_loaded() {
        output.error(&format!(
            "Host config could not be loaded: {}",
            config_path.display()
        ));
        return exit_status(CONFIGURATION_ERROR_CODE);
    }

    let failures = host.load_failures();

    if output.is_json() {
        output.data(&serde_json::json!({
            "config": config_path.display().to_string(),
            "loaded": host.plugins().len(),
            "failures": failures,
            "global_timeout_secs": host.global_timeout().map(|t| t.as_secs_f64()),
        }));
    } else {
        output.success(&format!(
            "Configuration OK: {} plugin(s) loaded, {} dropped",
            host.plugins().len(),
            failures.len()
        ));
        for failure in failures {
            println!("  dropped {}: {}", failure.plugin_name, failure.reason);
        }
    }

    0
}
