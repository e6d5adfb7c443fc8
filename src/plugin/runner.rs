//! Script execution with timeout and retries
//!
//! One invocation runs a plugin's pre or post script:
//!
//! ```text
//! spawn ──► exited 0 ───────────────► Success
//!   │  ├──► exited n, retries left ─► spawn again
//!   │  └──► exited n, no retries ───► ProcessFailure(n)
//!   └─────► deadline passed ────────► kill, Timeout (never retried)
//! ```
//!
//! The deadline is wall-clock, starts at the first spawn and covers every
//! retry of the invocation. Polling only detects exit; it never moves the
//! deadline.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::domain::{ErrorCode, Phase, PluginDescriptor, RunOutcome};
use crate::logging::{LogLevel, Logger};

/// Status reported when a script cannot be started at all
pub const SPAWN_FAILURE_STATUS: i32 = 127;

/// Status reported when the child can no longer be waited on
pub const WAIT_FAILURE_STATUS: i32 = 255;

/// Maximum bytes kept from each of stdout/stderr per attempt
const MAX_OUTPUT_BYTES: u64 = 64 * 1024;

/// Maximum characters of stderr echoed into the log
const MAX_LOGGED_STDERR: usize = 500;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for output readers after the child exits
const DEFAULT_OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Exited(i32),
    TimedOut,
}

/// Runs plugin scripts as child processes
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    poll_interval: Duration,
    output_grace: Duration,
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            output_grace: DEFAULT_OUTPUT_GRACE,
        }
    }

    /// Sets how often a running child is checked for exit
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Runs the phase script of `descriptor`, retrying failed exits
    pub fn run(&self, descriptor: &PluginDescriptor, phase: Phase, logger: &dyn Logger) -> RunOutcome {
        let started = Instant::now();
        // None when the timeout is too large to represent: the script is never killed
        let deadline = started.checked_add(descriptor.timeout);
        let argv = descriptor.command_line(phase);
        let max_retries = descriptor.script(phase).max_retries;
        let label = phase.script_label();
        let name = &descriptor.name;

        logger.log(
            &format!("Running {} for {} module...", label.to_lowercase(), name),
            true,
            LogLevel::Info,
        );

        let mut retries_used = 0;
        let exit_code = loop {
            match self.attempt(&argv, deadline, descriptor, phase, logger) {
                Attempt::Exited(0) => break ErrorCode::Success,
                Attempt::TimedOut => {
                    logger.log(&format!("{} for {} timed out.", label, name), true, LogLevel::Error);
                    break ErrorCode::Timeout;
                }
                Attempt::Exited(status) if retries_used < max_retries => {
                    if expired(deadline) {
                        break ErrorCode::ProcessFailure(status);
                    }
                    retries_used += 1;
                    logger.log(
                        &format!(
                            "{} for {} failed with error code: {}. Retrying ({}/{})...",
                            label, name, status, retries_used, max_retries
                        ),
                        true,
                        LogLevel::Info,
                    );
                }
                Attempt::Exited(status) => break ErrorCode::ProcessFailure(status),
            }
        };

        match exit_code {
            ErrorCode::Success => logger.log(
                &format!("{} for {} successfully executed.", label, name),
                true,
                LogLevel::Info,
            ),
            ErrorCode::ProcessFailure(status) => logger.log(
                &format!("{} for {} failed with error code: {}.", label, name, status),
                true,
                LogLevel::Error,
            ),
            _ => {}
        }

        RunOutcome::finished(descriptor, phase, exit_code, retries_used)
            .with_duration(started.elapsed())
    }

    fn attempt(
        &self,
        argv: &[String],
        deadline: Option<Instant>,
        descriptor: &PluginDescriptor,
        phase: Phase,
        logger: &dyn Logger,
    ) -> Attempt {
        let (program, args) = match argv.split_first() {
            Some(split) => split,
            None => return Attempt::Exited(SPAWN_FAILURE_STATUS),
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so a timeout can take down grandchildren too
            command.process_group(0);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                logger.log(
                    &format!(
                        "Cannot start {} for {} ({}): {}",
                        phase.script_label().to_lowercase(),
                        descriptor.name,
                        program,
                        e
                    ),
                    true,
                    LogLevel::Error,
                );
                return Attempt::Exited(SPAWN_FAILURE_STATUS);
            }
        };

        tracing::debug!(plugin = %descriptor.name, %phase, pid = child.id(), "spawned hook script");
        let capture = OutputCapture::start(&mut child);

        let result = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Attempt::Exited(status_code(status)),
                Ok(None) => {
                    let now = Instant::now();
                    let pause = match deadline {
                        Some(deadline) if now >= deadline => {
                            terminate(&mut child);
                            break Attempt::TimedOut;
                        }
                        Some(deadline) => self.poll_interval.min(deadline - now),
                        None => self.poll_interval,
                    };
                    thread::sleep(pause);
                }
                Err(e) => {
                    tracing::warn!(plugin = %descriptor.name, error = %e, "failed to poll hook script");
                    terminate(&mut child);
                    break Attempt::Exited(WAIT_FAILURE_STATUS);
                }
            }
        };

        let output = capture.collect(self.output_grace);
        tracing::debug!(
            plugin = %descriptor.name,
            %phase,
            stdout = %output.stdout.trim_end(),
            stderr = %output.stderr.trim_end(),
            "hook script output"
        );
        if matches!(result, Attempt::Exited(status) if status != 0) && !output.stderr.trim().is_empty() {
            logger.log(
                &format!(
                    "{} for {} stderr: {}",
                    phase.script_label(),
                    descriptor.name,
                    truncate(output.stderr.trim(), MAX_LOGGED_STDERR)
                ),
                false,
                LogLevel::Error,
            );
        }

        result
    }
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Raw exit status; signals map to `128 + signal` like a shell reports them
fn status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    WAIT_FAILURE_STATUS
}

/// Best-effort kill of the child and its process group, then reap it
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: kill(2) takes plain integers and has no memory preconditions
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct CapturedOutput {
    stdout: String,
    stderr: String,
}

/// Drains the child's pipes on background threads
///
/// Each reader sends its text once the pipe closes, so a chatty script never
/// blocks on a full pipe while the runner is polling for exit.
struct OutputCapture {
    rx: mpsc::Receiver<(Stream, String)>,
    expected: usize,
}

impl OutputCapture {
    fn start(child: &mut Child) -> Self {
        let (tx, rx) = mpsc::channel();
        let mut expected = 0;

        if let Some(stdout) = child.stdout.take() {
            expected += usize::from(spawn_reader(Stream::Stdout, stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            expected += usize::from(spawn_reader(Stream::Stderr, stderr, tx));
        }

        Self { rx, expected }
    }

    /// Collects whatever the readers deliver within `grace`
    ///
    /// A background process that inherited the pipes can keep them open
    /// after the script exits; its output is abandoned rather than waited on.
    /// The abandoned reader thread stays blocked until the last holder of
    /// the pipe exits, so each such attempt keeps one thread alive that long.
    fn collect(self, grace: Duration) -> CapturedOutput {
        let deadline = Instant::now() + grace;
        let mut output = CapturedOutput::default();

        for _ in 0..self.expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok((Stream::Stdout, text)) => output.stdout = text,
                Ok((Stream::Stderr, text)) => output.stderr = text,
                Err(_) => break,
            }
        }

        output
    }
}

fn spawn_reader<R>(stream: Stream, mut reader: R, tx: mpsc::Sender<(Stream, String)>) -> bool
where
    R: Read + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name(format!("hook-{:?}", stream).to_lowercase())
        .spawn(move || {
            let mut buf = Vec::new();
            let _ = (&mut reader).take(MAX_OUTPUT_BYTES).read_to_end(&mut buf);
            let _ = io::copy(&mut reader, &mut io::sink());
            let _ = tx.send((stream, String::from_utf8_lossy(&buf).into_owned()));
        });

    match spawned {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "failed to start output reader");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PhaseScript;
    use crate::logging::MemoryLogger;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn runner() -> ScriptRunner {
        ScriptRunner::new().with_poll_interval(Duration::from_millis(10))
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn attempts(counter: &Path) -> usize {
        fs::read_to_string(counter)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[test]
    fn success_on_first_attempt() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "ok.sh", "exit 0\n");
        let descriptor = PluginDescriptor::new("ok", &script, &script);
        let logger = MemoryLogger::new();

        let outcome = runner().run(&descriptor, Phase::Pre, &logger);

        assert_eq!(outcome.exit_code, ErrorCode::Success);
        assert_eq!(outcome.retries_used, 0);
        assert!(outcome.continue_backup);
        assert!(logger.contains("Prescript for ok successfully executed."));
    }

    #[test]
    fn always_failing_script_runs_retries_plus_one_times() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let script = write_script(dir.path(), "fail.sh", "echo run >> \"$1\"\nexit 3\n");
        let descriptor = PluginDescriptor::new("db", &script, &script)
            .with_pre(
                PhaseScript::new(&script)
                    .with_params([counter.to_string_lossy().into_owned()])
                    .with_retries(2),
            )
            .with_continue_on_failure(false);
        let logger = MemoryLogger::new();

        let outcome = runner().run(&descriptor, Phase::Pre, &logger);

        assert_eq!(outcome.exit_code, ErrorCode::ProcessFailure(3));
        assert_eq!(outcome.retries_used, 2);
        assert_eq!(outcome.retries_allowed, 2);
        assert!(!outcome.continue_backup);
        assert_eq!(attempts(&counter), 3);
        assert_eq!(logger.count("Retrying"), 2);
    }

    #[test]
    fn retry_can_recover() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let script = write_script(
            dir.path(),
            "flaky.sh",
            "echo run >> \"$1\"\n[ \"$(wc -l < \"$1\")\" -ge 2 ]\n",
        );
        let descriptor = PluginDescriptor::new("flaky", &script, &script).with_post(
            PhaseScript::new(&script)
                .with_params([counter.to_string_lossy().into_owned()])
                .with_retries(5),
        );

        let outcome = runner().run(&descriptor, Phase::Post, &MemoryLogger::new());

        assert_eq!(outcome.exit_code, ErrorCode::Success);
        assert_eq!(outcome.retries_used, 1);
        assert_eq!(attempts(&counter), 2);
    }

    #[test]
    fn timeout_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let script = write_script(dir.path(), "hang.sh", "echo run >> \"$1\"\nsleep 30\n");
        let descriptor = PluginDescriptor::new("hang", &script, &script)
            .with_pre(
                PhaseScript::new(&script)
                    .with_params([counter.to_string_lossy().into_owned()])
                    .with_retries(3),
            )
            .with_timeout(Duration::from_millis(300))
            .with_continue_on_failure(false);
        let logger = MemoryLogger::new();

        let started = Instant::now();
        let outcome = runner().run(&descriptor, Phase::Pre, &logger);

        assert_eq!(outcome.exit_code, ErrorCode::Timeout);
        assert_eq!(outcome.retries_used, 0);
        assert!(!outcome.continue_backup);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(attempts(&counter), 1);
        assert!(logger.contains("Prescript for hang timed out."));
    }

    #[test]
    fn exhausted_budget_reports_last_failure_without_retrying() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let script = write_script(dir.path(), "fail.sh", "echo run >> \"$1\"\nexit 3\n");
        let descriptor = PluginDescriptor::new("late", &script, &script)
            .with_pre(
                PhaseScript::new(&script)
                    .with_params([counter.to_string_lossy().into_owned()])
                    .with_retries(3),
            )
            .with_timeout(Duration::from_millis(300));
        let logger = MemoryLogger::new();

        // The first exit is only noticed once the whole budget has elapsed
        let slow_poll = ScriptRunner::new().with_poll_interval(Duration::from_secs(5));
        let outcome = slow_poll.run(&descriptor, Phase::Pre, &logger);

        assert_eq!(outcome.exit_code, ErrorCode::ProcessFailure(3));
        assert_eq!(outcome.retries_used, 0);
        assert_eq!(attempts(&counter), 1);
        assert_eq!(logger.count("Retrying"), 0);
        assert!(!logger.contains("timed out"));
    }

    #[test]
    fn unrepresentable_timeout_never_expires() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "ok.sh", "exit 0\n");
        let descriptor = PluginDescriptor::new("forever", &script, &script)
            .with_timeout(Duration::from_secs(u64::MAX));

        let outcome = runner().run(&descriptor, Phase::Pre, &MemoryLogger::new());

        assert_eq!(outcome.exit_code, ErrorCode::Success);
        assert_eq!(outcome.retries_used, 0);
    }

    #[test]
    fn background_child_holding_pipes_does_not_block() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "daemonize.sh", "sleep 5 &\nexit 0\n");
        let descriptor = PluginDescriptor::new("bg", &script, &script);

        let started = Instant::now();
        let outcome = runner().run(&descriptor, Phase::Pre, &MemoryLogger::new());

        assert_eq!(outcome.exit_code, ErrorCode::Success);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn timeout_respects_policy() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "hang.sh", "sleep 30\n");
        let descriptor = PluginDescriptor::new("hang", &script, &script)
            .with_timeout(Duration::from_millis(200))
            .with_continue_on_failure(true);

        let outcome = runner().run(&descriptor, Phase::Post, &MemoryLogger::new());

        assert_eq!(outcome.exit_code, ErrorCode::Timeout);
        assert!(outcome.continue_backup);
    }

    #[test]
    fn params_arrive_as_separate_arguments() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("args");
        let script = write_script(
            dir.path(),
            "args.sh",
            "out=\"$1\"\nshift\necho \"$#\" > \"$out\"\nfor a in \"$@\"; do echo \"$a\" >> \"$out\"; done\n",
        );
        let descriptor = PluginDescriptor::new("args", &script, &script).with_pre(
            PhaseScript::new(&script).with_params(vec![
                crate::domain::ScriptParam::from(out.to_string_lossy().into_owned()),
                "two words".into(),
                "$HOME; echo hi".into(),
                42i64.into(),
            ]),
        );

        let outcome = runner().run(&descriptor, Phase::Pre, &MemoryLogger::new());

        assert_eq!(outcome.exit_code, ErrorCode::Success);
        let written = fs::read_to_string(&out).unwrap();
        assert_eq!(written, "3\ntwo words\n$HOME; echo hi\n42\n");
    }

    #[test]
    fn missing_program_is_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.sh");
        let descriptor = PluginDescriptor::new("gone", &missing, &missing)
            .with_interpreter(Vec::<String>::new());
        let logger = MemoryLogger::new();

        let outcome = runner().run(&descriptor, Phase::Pre, &logger);

        assert_eq!(outcome.exit_code, ErrorCode::ProcessFailure(SPAWN_FAILURE_STATUS));
        assert!(logger.contains("Cannot start prescript for gone"));
    }

    #[cfg(unix)]
    #[test]
    fn signal_maps_to_shell_status() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "killed.sh", "kill -9 $$\n");
        let descriptor = PluginDescriptor::new("killed", &script, &script);

        let outcome = runner().run(&descriptor, Phase::Pre, &MemoryLogger::new());

        assert_eq!(outcome.exit_code, ErrorCode::ProcessFailure(137));
    }

    #[test]
    fn failing_stderr_is_logged() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "err.sh", "echo 'database busy' >&2\nexit 4\n");
        let descriptor = PluginDescriptor::new("db", &script, &script);
        let logger = MemoryLogger::new();

        let outcome = runner().run(&descriptor, Phase::Pre, &logger);

        assert_eq!(outcome.exit_code, ErrorCode::ProcessFailure(4));
        assert!(logger.contains("Prescript for db stderr: database busy"));
    }

    #[test]
    fn truncate_long_text() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
