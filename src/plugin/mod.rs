//! # Plugin System
//!
//! Discovers configured plugins and runs their pre/post backup hooks.
//!
//! ## Overview
//!
//! Each plugin owns a pre-script and a post-script together with its own
//! timeout, retry bound and failure policy. For one phase the host runs
//! every plugin's script at the same time, waits at most the global phase
//! timeout, and merges the outcomes into a single continue/abort verdict.
//!
//! ## Lifecycle
//!
//! ```text
//! PluginHost::load ──► run_phase(Pre) ──► backup ──► run_phase(Post)
//! ```
//!
//! Post always runs, whatever the pre verdict, so a plugin that froze
//! something in pre always gets to thaw it.
//!
//! ## Failure Policy
//!
//! | Outcome | Retried | Effect on verdict |
//! |---------|---------|-------------------|
//! | Success | - | none |
//! | Non-zero exit | up to the phase's retry bound | vetoes if `continue_on_failure = false` |
//! | Timeout | never | vetoes if `continue_on_failure = false` |
//! | Plugin config error | never | plugin dropped, reported separately |
//! | Root config error | never | phase returns code 10, nothing runs |
//!
//! ## Key Types
//!
//! - [`PluginHost`] - Loads plugins and runs phases
//! - [`PluginRegistry`] - Maps plugin kinds to implementations
//! - [`HookPlugin`] - Capability implemented by every plugin kind
//! - [`ScriptRunner`] - Spawns scripts with timeout and retries

mod host;
mod registry;
mod runner;

pub use host::{PluginHost, PANIC_STATUS};
pub use registry::{
    HookPlugin, LoadError, LoadReport, LoadedPlugin, PluginFactory, PluginRegistry, ScriptPlugin,
};
pub use runner::{ScriptRunner, SPAWN_FAILURE_STATUS, WAIT_FAILURE_STATUS};
