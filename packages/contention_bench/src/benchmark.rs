use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::unit::supervise_unit;
use crate::{BenchmarkConfig, BenchmarkResult, ConfigError, Outcome, SharedState, UnitError};

/// One contention experiment: N units, each performing M locked increments of one shared
/// counter, waited for with an overall deadline.
///
/// All units are submitted to the current tokio runtime at once, without any admission
/// control. The runtime multiplexes them onto its worker threads; a unit only suspends while
/// waiting for the lock.
///
/// # Examples
///
/// ```
/// use contention_bench::{BenchmarkConfig, ContentionBenchmark};
/// use new_zealand::nz;
///
/// # #[tokio::main]
/// # async fn main() {
/// let config = BenchmarkConfig::new()
///     .with_task_count(nz!(10))
///     .with_ops_per_task(100);
///
/// let result = ContentionBenchmark::new(config).unwrap().execute().await;
///
/// assert_eq!(result.actual_total(), 1_000);
/// assert_eq!(result.completed(), 10);
/// # }
/// ```
#[derive(Debug)]
pub struct ContentionBenchmark {
    config: BenchmarkConfig,
    expected_total: u64,
    state: Arc<SharedState>,
}

impl ContentionBenchmark {
    /// Prepares a run with fresh shared state.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration does not describe a runnable experiment.
    pub fn new(config: BenchmarkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let expected_total = config.expected_total()?;

        Ok(Self {
            config,
            expected_total,
            state: Arc::new(SharedState::new()),
        })
    }

    /// The configuration this run was prepared with.
    #[must_use]
    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// The state shared by all units of this run.
    ///
    /// Cloning the `Arc` before calling [`execute()`](Self::execute) allows the counter to be
    /// observed while the run is in progress.
    #[must_use]
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Launches all units and waits for them to finish or for the timeout to elapse.
    ///
    /// Must be called from within a tokio runtime with the time driver enabled.
    ///
    /// If the timeout elapses, the units still in flight are not cancelled. They keep running
    /// on the runtime for as long as it lives and may keep changing the counter after this
    /// returns. What they do to the counter after that point is not part of the result.
    pub async fn execute(self) -> BenchmarkResult {
        let task_count = self.config.task_count();
        let ops_per_task = self.config.ops_per_task();
        let fault = self.config.fault().copied();

        tracing::info!(
            tasks = task_count.get(),
            ops_per_task,
            expected_total = self.expected_total,
            "dispatching units"
        );

        let start = Instant::now();

        let handles: Vec<JoinHandle<Result<(), UnitError>>> = (0..task_count.get())
            .map(|unit| {
                tokio::spawn(supervise_unit(
                    unit,
                    ops_per_task,
                    Arc::clone(&self.state),
                    fault,
                ))
            })
            .collect();

        // The deadline is measured from the start of submission, not from the end of it.
        let remaining = self.config.timeout().saturating_sub(start.elapsed());

        let outcome = match time::timeout(remaining, join_all(handles)).await {
            Ok(joined) => {
                for join_error in joined.into_iter().filter_map(Result::err) {
                    // Units catch their own panics, so this only happens if the runtime is
                    // shutting down underneath us.
                    tracing::warn!(%join_error, "unit did not run to the end");
                }

                Outcome::Completed
            }
            // Dropping the join handles detaches the units, it does not abort them.
            Err(_elapsed) => Outcome::TimedOut,
        };

        let elapsed = start.elapsed();
        let actual_total = self.state.counter_value().await;

        let result = BenchmarkResult {
            elapsed,
            expected_total: self.expected_total,
            actual_total,
            completed: self.state.completed(),
            task_count,
            failures: self.state.failures(),
            outcome,
        };

        // The report carries the user-facing warnings for both of these.
        if let Some(mismatch) = result.mismatch() {
            tracing::debug!(%mismatch, "counter does not match the expected total");
        }

        if result.timed_out() {
            tracing::debug!(
                completed = result.completed,
                tasks = task_count.get(),
                "timed out waiting for units"
            );
        }

        tracing::info!(
            %outcome,
            elapsed_secs = elapsed.as_secs_f64(),
            completed = result.completed,
            failed = result.failures.len(),
            "benchmark finished"
        );

        result
    }
}
