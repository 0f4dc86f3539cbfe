use std::num::NonZero;
use std::time::Duration;

use new_zealand::nz;

use crate::FaultInjection;

/// Number of units launched when no other value is configured.
pub const DEFAULT_TASK_COUNT: NonZero<usize> = nz!(15_000);

/// Number of locked increments each unit performs when no other value is configured.
pub const DEFAULT_OPS_PER_TASK: u64 = 1_000;

/// How long the completion tracker waits for all units before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Describes the shape of one contention experiment: how many units to launch, how many
/// increments each of them performs and how long to wait for them.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use contention_bench::BenchmarkConfig;
/// use new_zealand::nz;
///
/// let config = BenchmarkConfig::new()
///     .with_task_count(nz!(10))
///     .with_ops_per_task(100)
///     .with_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.expected_total().unwrap(), 1_000);
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BenchmarkConfig {
    task_count: NonZero<usize>,
    ops_per_task: u64,
    timeout: Duration,
    worker_threads: Option<NonZero<usize>>,
    fault: Option<FaultInjection>,
}

impl BenchmarkConfig {
    /// Creates a configuration with the default experiment shape.
    #[must_use]
    pub fn new() -> Self {
        Self {
            task_count: DEFAULT_TASK_COUNT,
            ops_per_task: DEFAULT_OPS_PER_TASK,
            timeout: DEFAULT_TIMEOUT,
            worker_threads: None,
            fault: None,
        }
    }

    /// Sets the number of units to launch.
    #[must_use]
    pub fn with_task_count(mut self, task_count: NonZero<usize>) -> Self {
        self.task_count = task_count;
        self
    }

    /// Sets the number of locked increments performed by each unit.
    #[must_use]
    pub fn with_ops_per_task(mut self, ops_per_task: u64) -> Self {
        self.ops_per_task = ops_per_task;
        self
    }

    /// Sets the overall wait bound, measured from the moment the timer starts.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of runtime worker threads the units are multiplexed onto.
    ///
    /// If not set, the runtime picks one worker per available processor.
    #[must_use]
    pub fn with_worker_threads(mut self, worker_threads: NonZero<usize>) -> Self {
        self.worker_threads = Some(worker_threads);
        self
    }

    /// Makes one unit fail at a fixed point of its loop. See [`FaultInjection`].
    #[must_use]
    pub fn with_fault(mut self, fault: FaultInjection) -> Self {
        self.fault = Some(fault);
        self
    }

    /// The number of units to launch.
    #[must_use]
    pub fn task_count(&self) -> NonZero<usize> {
        self.task_count
    }

    /// The number of locked increments performed by each unit.
    #[must_use]
    pub fn ops_per_task(&self) -> u64 {
        self.ops_per_task
    }

    /// The overall wait bound.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The requested number of runtime worker threads, if any.
    #[must_use]
    pub fn worker_threads(&self) -> Option<NonZero<usize>> {
        self.worker_threads
    }

    /// The fault to inject, if any.
    #[must_use]
    pub fn fault(&self) -> Option<&FaultInjection> {
        self.fault.as_ref()
    }

    /// The counter value a correct run must end with: task count times operations per task.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ExpectedTotalOverflow`] if the product does not fit in a `u64`.
    pub fn expected_total(&self) -> Result<u64, ConfigError> {
        u64::try_from(self.task_count.get())
            .ok()
            .and_then(|tasks| tasks.checked_mul(self.ops_per_task))
            .ok_or(ConfigError::ExpectedTotalOverflow {
                task_count: self.task_count.get(),
                ops_per_task: self.ops_per_task,
            })
    }

    /// Checks that the configuration describes an experiment that can actually run.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        self.expected_total()?;

        if let Some(fault) = &self.fault {
            if fault.unit() >= self.task_count.get() {
                return Err(ConfigError::FaultUnitOutOfRange {
                    unit: fault.unit(),
                    task_count: self.task_count.get(),
                });
            }

            if fault.at_op() >= self.ops_per_task {
                return Err(ConfigError::FaultOpOutOfRange {
                    op: fault.at_op(),
                    ops_per_task: self.ops_per_task,
                });
            }
        }

        Ok(())
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A configuration that cannot be turned into a benchmark run.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The timeout would expire before any unit could be scheduled.
    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    /// The expected counter total does not fit in the counter type.
    #[error("{task_count} tasks x {ops_per_task} operations overflows the counter")]
    ExpectedTotalOverflow {
        /// Configured task count.
        task_count: usize,
        /// Configured operations per task.
        ops_per_task: u64,
    },

    /// The fault targets a unit that is never launched.
    #[error("fault targets unit {unit} but only {task_count} units are launched")]
    FaultUnitOutOfRange {
        /// Unit index the fault targets.
        unit: usize,
        /// Configured task count.
        task_count: usize,
    },

    /// The fault targets an iteration that is never reached.
    #[error("fault targets operation {op} but each unit performs only {ops_per_task}")]
    FaultOpOutOfRange {
        /// Iteration index the fault targets.
        op: u64,
        /// Configured operations per task.
        ops_per_task: u64,
    },
}
