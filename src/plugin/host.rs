//! Plugin host: runs one phase of every plugin concurrently
//!
//! ```text
//!              ┌─► unit "pre-oracle" ─► hook.run_pre ─┐
//! run_phase ───┼─► unit "pre-mysql"  ─► hook.run_pre ─┼─► channel ─► aggregate
//!              └─► ...                                ┘   (bounded by the
//!                                                          global timeout)
//! ```
//!
//! Each plugin runs on its own thread and publishes exactly one
//! `(index, RunOutcome)` through a channel. The host waits on the channel
//! until every plugin has reported or the global phase timeout expires;
//! plugins still running at that point are recorded as `Timeout` and
//! whatever they report later is dropped with the closed channel.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::registry::{LoadReport, LoadedPlugin, PluginRegistry};
use super::runner::SPAWN_FAILURE_STATUS;
use crate::config::ConfigSource;
use crate::domain::{ErrorCode, LoadFailure, Phase, PhaseResult, PhaseState, RunOutcome};
use crate::logging::{LogLevel, Logger};

/// Status reported for a plugin whose hook panicked
pub const PANIC_STATUS: i32 = 101;

/// Orchestrates the pre and post phases of all loaded plugins
pub struct PluginHost {
    registry: PluginRegistry,
    logger: Arc<dyn Logger>,
    loaded: Option<LoadReport>,
    states: Mutex<[PhaseState; 2]>,
}

impl PluginHost {
    /// Creates a host with the built-in plugin kinds
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self::with_registry(PluginRegistry::new(), logger)
    }

    pub fn with_registry(registry: PluginRegistry, logger: Arc<dyn Logger>) -> Self {
        Self {
            registry,
            logger,
            loaded: None,
            states: Mutex::new([PhaseState::NotLoaded; 2]),
        }
    }

    /// Loads plugins from `source`; returns false if the root config failed
    ///
    /// Reloading replaces the previous plugin set.
    pub fn load(&mut self, source: &dyn ConfigSource) -> bool {
        self.log("Loading script modules now...", LogLevel::Info);

        match self.registry.load(source, self.logger.as_ref()) {
            Ok(report) => {
                self.log(
                    &format!(
                        "Modules loaded successfully from {}: {} loaded, {} failed.",
                        source.describe(),
                        report.plugins.len(),
                        report.failures.len()
                    ),
                    LogLevel::Info,
                );
                self.loaded = Some(report);
                self.set_all_states(PhaseState::Loaded);
                true
            }
            Err(e) => {
                self.log(
                    &format!("Error in PluginHost config file {}: {}", source.describe(), e),
                    LogLevel::Error,
                );
                self.loaded = None;
                self.set_all_states(PhaseState::NotLoaded);
                false
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Loaded plugins in registration order
    pub fn plugins(&self) -> &[LoadedPlugin] {
        self.loaded
            .as_ref()
            .map(|r| r.plugins.as_slice())
            .unwrap_or(&[])
    }

    pub fn load_failures(&self) -> &[LoadFailure] {
        self.loaded
            .as_ref()
            .map(|r| r.failures.as_slice())
            .unwrap_or(&[])
    }

    pub fn global_timeout(&self) -> Option<Duration> {
        self.loaded.as_ref().map(|r| r.global_timeout)
    }

    /// Current state of a phase's lifecycle
    pub fn phase_state(&self, phase: Phase) -> PhaseState {
        match self.states.lock() {
            Ok(states) => states[phase.index()],
            Err(poisoned) => poisoned.into_inner()[phase.index()],
        }
    }

    pub fn run_pre(&self) -> PhaseResult {
        self.run_phase(Phase::Pre)
    }

    /// Runs the post phase; callers run it whatever the pre verdict was
    pub fn run_post(&self) -> PhaseResult {
        self.run_phase(Phase::Post)
    }

    /// Runs one phase of every loaded plugin concurrently
    pub fn run_phase(&self, phase: Phase) -> PhaseResult {
        let report = match &self.loaded {
            Some(report) => report,
            None => {
                self.log(
                    &format!("Cannot run {} phase: PluginHost config file error.", phase),
                    LogLevel::Error,
                );
                self.set_state(phase, PhaseState::NotLoaded);
                return PhaseResult::not_loaded(phase);
            }
        };

        self.set_state(phase, PhaseState::Running);
        self.log(
            &format!("Starting {} for all modules.", phase.script_label().to_lowercase()),
            LogLevel::Info,
        );

        let (slots, timed_out) = self.fan_out(phase, &report.plugins, report.global_timeout);

        let outcomes: Vec<RunOutcome> = report
            .plugins
            .iter()
            .zip(slots)
            .map(|(plugin, slot)| {
                slot.unwrap_or_else(|| {
                    self.log(
                        &format!(
                            "{} for {} did not finish before the global timeout.",
                            phase.script_label(),
                            plugin.descriptor.name
                        ),
                        LogLevel::Error,
                    );
                    RunOutcome::timed_out(&plugin.descriptor, phase)
                })
            })
            .collect();

        let state = if timed_out {
            PhaseState::GloballyTimedOut
        } else {
            PhaseState::Completed
        };

        let result = PhaseResult::aggregate(
            phase,
            report
                .plugins
                .iter()
                .map(|p| p.descriptor.name.as_str())
                .zip(outcomes.iter()),
            state,
        )
        .with_load_failures(report.failures.clone());

        self.set_state(phase, state);
        self.log(
            &format!(
                "Finished {} execution from PluginHost side. Continue Backup: {}",
                phase.script_label().to_lowercase(),
                result.continue_backup
            ),
            LogLevel::Info,
        );

        result
    }

    /// Starts one unit per plugin and collects outcomes until the deadline
    ///
    /// Returns one slot per plugin (None if it never reported) and whether
    /// the global timeout cut the wait short.
    fn fan_out(
        &self,
        phase: Phase,
        plugins: &[LoadedPlugin],
        global_timeout: Duration,
    ) -> (Vec<Option<RunOutcome>>, bool) {
        let (tx, rx) = mpsc::channel::<(usize, RunOutcome)>();
        let mut slots: Vec<Option<RunOutcome>> = vec![None; plugins.len()];

        for (index, plugin) in plugins.iter().enumerate() {
            let tx = tx.clone();
            let descriptor = Arc::clone(&plugin.descriptor);
            let hook = Arc::clone(&plugin.hook);
            let logger = Arc::clone(&self.logger);

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", phase, descriptor.name))
                .spawn(move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        hook.run(phase, &descriptor, logger.as_ref())
                    }))
                    .unwrap_or_else(|_| {
                        logger.log(
                            &format!("{} for {} panicked.", phase.script_label(), descriptor.name),
                            true,
                            LogLevel::Error,
                        );
                        RunOutcome::finished(&descriptor, phase, ErrorCode::ProcessFailure(PANIC_STATUS), 0)
                    });
                    // The host may have stopped listening after a global timeout
                    let _ = tx.send((index, outcome));
                });

            if let Err(e) = spawned {
                self.log(
                    &format!(
                        "Cannot start {} for {}: {}",
                        phase.script_label().to_lowercase(),
                        plugin.descriptor.name,
                        e
                    ),
                    LogLevel::Error,
                );
                slots[index] = Some(RunOutcome::finished(
                    &plugin.descriptor,
                    phase,
                    ErrorCode::ProcessFailure(SPAWN_FAILURE_STATUS),
                    0,
                ));
            }
        }
        drop(tx);

        // A timeout too large to represent as an instant means no deadline
        let deadline = Instant::now().checked_add(global_timeout);
        let mut pending = slots.iter().filter(|s| s.is_none()).count();
        let mut timed_out = false;

        while pending > 0 {
            let received = match deadline {
                Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok((index, outcome)) => {
                    if slots[index].is_none() {
                        tracing::debug!(
                            plugin = %plugins[index].descriptor.name,
                            %phase,
                            code = outcome.exit_code.code(),
                            "plugin published outcome"
                        );
                        slots[index] = Some(outcome);
                        pending -= 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    timed_out = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        (slots, timed_out)
    }

    fn log(&self, message: &str, level: LogLevel) {
        self.logger.log(message, true, level);
    }

    fn set_state(&self, phase: Phase, state: PhaseState) {
        tracing::debug!(%phase, ?state, "phase state");
        match self.states.lock() {
            Ok(mut states) => states[phase.index()] = state,
            Err(poisoned) => poisoned.into_inner()[phase.index()] = state,
        }
    }

    fn set_all_states(&self, state: PhaseState) {
        self.set_state(Phase::Pre, state);
        self.set_state(Phase::Post, state);
    }
}
