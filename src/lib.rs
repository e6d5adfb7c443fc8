//! Prepost - pre/post backup hook orchestration
//!
//! Runs database-aware quiesce/thaw scripts contributed by independently
//! configured plugins around a backup, and turns their outcomes into a
//! single decision: proceed with the backup or abort.

pub mod cli;
pub mod config;
pub mod domain;
pub mod logging;
pub mod plugin;

pub use domain::{ErrorCode, Phase, PhaseResult, PluginDescriptor, RunOutcome};
pub use plugin::PluginHost;
