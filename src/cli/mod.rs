//! # Command-Line Interface
//!
//! User-facing CLI commands and output formatting.
//!
//! ## Commands
//!
//! | Command | Purpose | Exit code |
//! |---------|---------|-----------|
//! | `run pre\|post` | Run one phase | phase exit code |
//! | `run all` | Pre, then post unconditionally | pre code if non-zero, else post code |
//! | `plugins list` | Show loaded and dropped plugins | `10` if the host config fails |
//! | `plugins add` | Register a plugin in the host config | `0` |
//! | `check` | Load the configuration only | `10` if the host config fails |
//!
//! ## Configuration
//!
//! The host config is taken from `--config`, then `PREPOST_CONFIG`, then
//! the per-user config directory.
//!
//! ## Output Formats
//!
//! All commands support `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod output;
mod plugin_cmd;
mod run_cmd;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
pub use plugin_cmd::PluginCommands;
pub use run_cmd::RunTarget;
