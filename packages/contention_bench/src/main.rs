#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

//! Binary entry point for the contention benchmark.
//!
//! This module is excluded from mutation testing because testing process entry/exit behavior
//! is impractical - it requires spawning subprocesses and checking exit codes.

use std::io;
use std::num::NonZero;
use std::process::ExitCode;
use std::time::Duration;

use argh::FromArgs;
use contention_bench::{
    BenchmarkConfig, DEFAULT_OPS_PER_TASK, DEFAULT_TASK_COUNT, DEFAULT_TIMEOUT, FaultInjection,
    FaultKind, run,
};
use tracing_subscriber::EnvFilter;

/// Launches many lightweight tasks that all increment one shared counter behind one lock,
/// then reports the elapsed time and whether the final count is exact.
#[derive(FromArgs)]
struct Args {
    /// number of tasks to launch (default 15000)
    #[argh(option, default = "DEFAULT_TASK_COUNT")]
    tasks: NonZero<usize>,

    /// locked increments performed by each task (default 1000)
    #[argh(option, default = "DEFAULT_OPS_PER_TASK")]
    ops_per_task: u64,

    /// seconds to wait for all tasks before giving up (default 600)
    #[argh(option, default = "DEFAULT_TIMEOUT.as_secs()")]
    timeout_secs: u64,

    /// number of runtime worker threads (default: one per processor)
    #[argh(option)]
    worker_threads: Option<NonZero<usize>>,

    /// make the task with this index fail, for exercising the error path
    #[argh(option, hidden_help)]
    fail_unit: Option<usize>,

    /// iteration at which the failing task fails (default 0, requires --fail-unit)
    #[argh(option, hidden_help)]
    fail_at_op: Option<u64>,

    /// make the failing task panic while holding the lock instead of returning an error
    /// (requires --fail-unit)
    #[argh(switch, hidden_help)]
    fail_panic: bool,
}

impl Args {
    fn into_config(self) -> Result<BenchmarkConfig, &'static str> {
        let mut config = BenchmarkConfig::new()
            .with_task_count(self.tasks)
            .with_ops_per_task(self.ops_per_task)
            .with_timeout(Duration::from_secs(self.timeout_secs));

        if let Some(worker_threads) = self.worker_threads {
            config = config.with_worker_threads(worker_threads);
        }

        match self.fail_unit {
            Some(unit) => {
                let kind = if self.fail_panic {
                    FaultKind::Panic
                } else {
                    FaultKind::Error
                };

                let at_op = self.fail_at_op.unwrap_or(0);
                config = config.with_fault(FaultInjection::new(unit, at_op, kind));
            }
            None if self.fail_at_op.is_some() || self.fail_panic => {
                return Err("--fail-at-op and --fail-panic require --fail-unit");
            }
            None => {}
        }

        Ok(config)
    }
}

// Binary entry point - mutations would require subprocess testing which is impractical.
#[cfg_attr(test, mutants::skip)]
fn main() -> ExitCode {
    let args: Args = argh::from_env();

    // Per-unit errors and warnings are diagnostics, so they share stderr with the mismatch and
    // timeout lines. The report itself is plain text on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::FAILURE;
        }
    };

    // Units log to stderr from worker threads, so stderr must not stay locked during the run.
    // A mismatch or a timeout is reported but is not a process failure.
    match run(&config, &mut io::stdout().lock(), &mut io::stderr()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
