//! Per-plugin outcomes and their aggregation into a phase verdict

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::descriptor::{Phase, PluginDescriptor};
use super::error_code::ErrorCode;

/// Result of one plugin's hook for one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub exit_code: ErrorCode,

    /// Re-spawns performed after the first attempt
    pub retries_used: u32,

    /// Retry bound that applied to this invocation
    pub retries_allowed: u32,

    /// Whether this plugin lets the backup proceed
    pub continue_backup: bool,

    #[serde(skip)]
    pub duration: Duration,
}

impl RunOutcome {
    /// Builds the outcome for a finished invocation
    ///
    /// `continue_backup` follows the descriptor's policy only on failure.
    pub fn finished(
        descriptor: &PluginDescriptor,
        phase: Phase,
        exit_code: ErrorCode,
        retries_used: u32,
    ) -> Self {
        let continue_backup = exit_code.is_success() || descriptor.continue_on_failure;
        Self {
            exit_code,
            retries_used,
            retries_allowed: descriptor.script(phase).max_retries,
            continue_backup,
            duration: Duration::ZERO,
        }
    }

    /// Outcome recorded for a plugin whose hook never published in time
    pub fn timed_out(descriptor: &PluginDescriptor, phase: Phase) -> Self {
        Self::finished(descriptor, phase, ErrorCode::Timeout, 0)
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn failed(&self) -> bool {
        !self.exit_code.is_success()
    }
}

/// One line of a phase report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginError {
    pub plugin_name: String,
    pub error_code: ErrorCode,
    pub continue_backup: bool,
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plugin: {} ErrorCode: {}",
            self.plugin_name,
            self.error_code.code()
        )
    }
}

/// A plugin dropped during loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub plugin_name: String,
    pub reason: String,
}

/// Per-phase lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    NotLoaded,
    Loaded,
    Running,
    Completed,
    GloballyTimedOut,
}

/// Aggregated verdict of one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseResult {
    pub phase: Phase,

    /// One entry per loaded plugin, in registration order
    pub errors: Vec<PluginError>,

    pub any_failed: bool,
    pub continue_backup: bool,

    /// `Success`, or `ConfigurationError` when nothing could be loaded
    pub error_code: ErrorCode,

    pub state: PhaseState,

    /// Plugins dropped at load time; informational only
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub load_failures: Vec<LoadFailure>,
}

impl PhaseResult {
    /// Result for a phase that could not start because nothing was loaded
    pub fn not_loaded(phase: Phase) -> Self {
        Self {
            phase,
            errors: Vec::new(),
            any_failed: false,
            continue_backup: true,
            error_code: ErrorCode::ConfigurationError,
            state: PhaseState::NotLoaded,
            load_failures: Vec::new(),
        }
    }

    /// Merges per-plugin outcomes, given in registration order
    ///
    /// The result depends only on the outcomes and their registration
    /// order, never on the order in which plugins finished.
    pub fn aggregate<'a, I>(phase: Phase, outcomes: I, state: PhaseState) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a RunOutcome)>,
    {
        let mut errors = Vec::new();
        let mut any_failed = false;
        let mut continue_backup = true;

        for (name, outcome) in outcomes {
            any_failed |= outcome.failed();
            continue_backup &= outcome.continue_backup;
            errors.push(PluginError {
                plugin_name: name.to_string(),
                error_code: outcome.exit_code,
                continue_backup: outcome.continue_backup,
            });
        }

        Self {
            phase,
            errors,
            any_failed,
            continue_backup,
            error_code: ErrorCode::Success,
            state,
            load_failures: Vec::new(),
        }
    }

    pub fn with_load_failures(mut self, load_failures: Vec<LoadFailure>) -> Self {
        self.load_failures = load_failures;
        self
    }

    /// Collapses the phase into a process exit code
    ///
    /// `10` when nothing loaded, `0` when the backup may continue, otherwise
    /// the code of the first vetoing plugin in registration order.
    pub fn exit_code(&self) -> i32 {
        if self.error_code == ErrorCode::ConfigurationError {
            return self.error_code.code();
        }
        if self.continue_backup {
            return 0;
        }
        self.errors
            .iter()
            .find(|e| !e.continue_backup)
            .map(|e| e.error_code.code())
            .unwrap_or(0)
    }
}

impl fmt::Display for PhaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for error in &self.errors {
            writeln!(f, "{}", error)?;
        }
        for failure in &self.load_failures {
            writeln!(f, "Plugin: {} not loaded: {}", failure.plugin_name, failure.reason)?;
        }
        writeln!(f, "Final Error Code: {}", self.error_code.code())?;
        writeln!(f, "Any script Failed: {}", self.any_failed)?;
        write!(f, "Continue Backup: {}", self.continue_backup)
    }
}
