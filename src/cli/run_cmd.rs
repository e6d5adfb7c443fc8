//! Phase execution command

use super::app::exit_status;
use super::output::Output;
use crate::domain::{Phase, PhaseResult};
use crate::plugin::PluginHost;

/// What `prepost run` executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RunTarget {
    Pre,
    Post,
    /// Pre, then post regardless of the pre verdict
    All,
}

/// Runs the requested phase(s) and returns the exit code
pub fn run(host: &PluginHost, target: RunTarget, output: &Output) -> u8 {
    match target {
        RunTarget::Pre => run_single(host, Phase::Pre, output),
        RunTarget::Post => run_single(host, Phase::Post, output),
        RunTarget::All => run_all(host, output),
    }
}

fn run_single(host: &PluginHost, phase: Phase, output: &Output) -> u8 {
    output.verbose_ctx("run", &format!("Running {} phase", phase));
    let result = host.run_phase(phase);

    if output.is_json() {
        output.data(&result);
    } else {
        print_result(&result);
    }

    exit_status(result.exit_code())
}

fn run_all(host: &PluginHost, output: &Output) -> u8 {
    output.verbose_ctx("run", "Running pre phase");
    let pre = host.run_pre();

    if !pre.continue_backup {
        output.verbose_ctx("run", "Pre phase vetoed the backup; running post anyway");
    }

    output.verbose_ctx("run", "Running post phase");
    let post = host.run_post();

    if output.is_json() {
        output.data(&serde_json::json!({
            "pre": pre,
            "post": post,
        }));
    } else {
        print_result(&pre);
        println!();
        print_result(&post);
    }

    match pre.exit_code() {
        0 => exit_status(post.exit_code()),
        code => exit_status(code),
    }
}

fn print_result(result: &PhaseResult) {
    println!("{} phase:", result.phase);
    println!("{}", result);
}
