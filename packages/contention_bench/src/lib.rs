#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Measures the throughput and correctness of one shared counter, guarded by one lock, under
//! extreme contention from a very large number of lightweight tasks.
//!
//! A run launches N units on a multi-threaded tokio runtime. Each unit performs M iterations
//! of "acquire the lock, increment the counter once, release the lock" and is counted as
//! completed once its loop finishes. The completion tracker waits for all units or for an
//! overall timeout, whichever comes first, and the result compares the counter against the
//! expected total of N x M.
//!
//! Any difference between the two on a run that did not time out means the lock failed to
//! serialize the increments. It is reported as a [`CounterMismatch`] warning.
//!
//! # Running a benchmark
//!
//! [`run()`] owns the whole process-level flow: it builds the runtime, prints the launch
//! banner, executes the run and prints the report.
//!
//! ```
//! use contention_bench::{BenchmarkConfig, run};
//! use new_zealand::nz;
//!
//! let config = BenchmarkConfig::new()
//!     .with_task_count(nz!(10))
//!     .with_ops_per_task(100);
//!
//! let mut out = Vec::new();
//! let mut err = Vec::new();
//! let result = run(&config, &mut out, &mut err).unwrap();
//!
//! assert_eq!(result.actual_total(), 1_000);
//! assert!(String::from_utf8(out).unwrap().contains("Actual counter value:   1,000"));
//! ```
//!
//! Inside an existing tokio runtime, use [`ContentionBenchmark`] directly.
//!
//! # Failures
//!
//! A unit that returns an error or panics is stopped, logged with its index and excluded from
//! the completion count. It never affects other units. [`FaultInjection`] makes one unit
//! fail at a fixed point, for exercising that path.

use std::io::{self, Write};

use tokio::runtime::Builder;

mod benchmark;
mod config;
mod fault;
mod report;
mod state;
mod unit;

pub use benchmark::*;
pub use config::*;
pub use fault::*;
pub use report::*;
pub use state::*;
pub use unit::UnitError;

/// Runs one benchmark on a dedicated runtime, writing the banner and report as it goes.
///
/// Normal report lines go to `out`, warnings (mismatch, timeout) go to `err`. A mismatch or a
/// timeout is part of the returned result, not an error.
///
/// If the run times out, the runtime is shut down without waiting for the units still in
/// flight, so they are abandoned rather than joined.
///
/// # Errors
///
/// Returns a [`RunError`] if the configuration is invalid, the runtime cannot be started or
/// a writer fails.
pub fn run(
    config: &BenchmarkConfig,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<BenchmarkResult, RunError> {
    let benchmark = ContentionBenchmark::new(config.clone())?;

    let mut builder = Builder::new_multi_thread();
    builder.enable_time().thread_name("contention-worker");

    if let Some(worker_threads) = benchmark.config().worker_threads() {
        builder.worker_threads(worker_threads.get());
    }

    let runtime = builder.build().map_err(RunError::Runtime)?;

    write_banner(benchmark.config(), runtime.metrics().num_workers(), out)
        .map_err(RunError::Report)?;

    let result = runtime.block_on(benchmark.execute());

    if result.timed_out() {
        runtime.shutdown_background();
    }

    write_report(&result, out, err).map_err(RunError::Report)?;

    Ok(result)
}

/// Errors that prevent a benchmark from producing a result.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RunError {
    /// The configuration does not describe a runnable experiment.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The task runtime could not be started.
    #[error("failed to start the task runtime: {0}")]
    Runtime(#[source] io::Error),

    /// The banner or report could not be written.
    #[error("failed to write the report: {0}")]
    Report(#[source] io::Error),
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use new_zealand::nz;
    use tracing::Level;

    use super::*;

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl CapturedLog {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn run_prints_banner_and_report() {
        let config = BenchmarkConfig::new()
            .with_task_count(nz!(10))
            .with_ops_per_task(100)
            .with_worker_threads(nz!(2));
        let mut out = Vec::new();
        let mut err = Vec::new();

        let result = run(&config, &mut out, &mut err).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(result.actual_total(), 1_000);
        assert!(out.contains("with 2 worker threads"), "{out}");
        assert!(out.contains("Launching 10 tasks..."), "{out}");
        assert!(out.contains("10 of 10 tasks completed."), "{out}");
        assert!(err.is_empty());
    }

    #[test]
    fn run_rejects_invalid_config() {
        let config = BenchmarkConfig::new().with_timeout(Duration::ZERO);

        let error = run(&config, &mut io::sink(), &mut io::sink()).unwrap_err();

        assert!(matches!(error, RunError::Config(ConfigError::ZeroTimeout)));
        assert_eq!(error.to_string(), "timeout must be greater than zero");
    }

    #[test]
    fn run_returns_after_timeout() {
        let config = BenchmarkConfig::new()
            .with_task_count(nz!(2_000))
            .with_ops_per_task(100_000)
            .with_timeout(Duration::from_millis(5));
        let mut err = Vec::new();

        let result = run(&config, &mut io::sink(), &mut err).unwrap();
        let err = String::from_utf8(err).unwrap();

        assert!(result.timed_out());
        assert!(err.contains("Timed out"), "{err}");
    }

    #[test]
    fn run_names_failing_unit_on_error_channel() {
        let config = BenchmarkConfig::new()
            .with_task_count(nz!(4))
            .with_ops_per_task(10)
            .with_fault(FaultInjection::new(2, 3, FaultKind::Panic));
        let mut err = Vec::new();

        let result = run(&config, &mut io::sink(), &mut err).unwrap();
        let err = String::from_utf8(err).unwrap();

        assert_eq!(result.actual_total(), 3 * 10 + 3);
        assert!(err.contains("Task failed: unit 2 panicked"), "{err}");
        assert!(err.contains("COUNTER VALUE MISMATCH!"), "{err}");
    }

    #[test]
    fn mismatch_is_not_logged_as_warning_on_top_of_report() {
        let config = BenchmarkConfig::new()
            .with_task_count(nz!(4))
            .with_ops_per_task(10)
            .with_fault(FaultInjection::new(1, 0, FaultKind::Error));
        let log = CapturedLog::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::WARN)
            .with_writer({
                let log = log.clone();
                move || log.clone()
            })
            .finish();
        let mut err = Vec::new();

        let result = tracing::subscriber::with_default(subscriber, || {
            run(&config, &mut io::sink(), &mut err).unwrap()
        });
        let err = String::from_utf8(err).unwrap();

        assert!(result.mismatch().is_some());
        assert_eq!(err.matches("COUNTER VALUE MISMATCH!").count(), 1, "{err}");
        assert!(!log.contents().contains("counter does not match"), "{}", log.contents());
    }
}
