//! # Domain Model
//!
//! Data shared by the registry, the script runner and the plugin host.
//!
//! ## Key Types
//!
//! - [`PluginDescriptor`] - Resolved, immutable configuration of one plugin
//! - [`RunOutcome`] - Result of one plugin's hook for one phase
//! - [`PhaseResult`] - Aggregated continue/abort verdict for a phase
//! - [`ErrorCode`] - The four-way exit code taxonomy

mod descriptor;
mod error_code;
mod outcome;

pub use descriptor::{Phase, PhaseScript, PluginDescriptor, ScriptParam};
pub use error_code::{ErrorCode, CONFIGURATION_ERROR_CODE, TIMEOUT_CODE};
pub use outcome::{LoadFailure, PhaseResult, PhaseState, PluginError, RunOutcome};

/// Registry key of the built-in script plugin
pub const DEFAULT_PLUGIN_KIND: &str = "script";
