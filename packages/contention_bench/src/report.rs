use std::fmt;
use std::io::{self, Write};
use std::num::NonZero;
use std::time::Duration;

use crate::{BenchmarkConfig, UnitError};

/// Whether the completion tracker saw every unit finish.
#[derive(Clone, Copy, Debug, derive_more::Display, Eq, PartialEq)]
#[non_exhaustive]
pub enum Outcome {
    /// Every unit finished (successfully or not) before the timeout.
    #[display("completed")]
    Completed,

    /// The timeout elapsed first. Units still in flight were left running.
    #[display("timed out")]
    TimedOut,
}

/// What one benchmark run observed.
///
/// On [`Outcome::TimedOut`] the actual total is whatever the counter held when the tracker
/// stopped waiting. Units left running may change the counter afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BenchmarkResult {
    pub(crate) elapsed: Duration,
    pub(crate) expected_total: u64,
    pub(crate) actual_total: u64,
    pub(crate) completed: usize,
    pub(crate) task_count: NonZero<usize>,
    pub(crate) failures: Vec<UnitError>,
    pub(crate) outcome: Outcome,
}

impl BenchmarkResult {
    /// Wall-clock time from just before the first unit was submitted until the tracker
    /// stopped waiting.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Task count times operations per task.
    #[must_use]
    pub fn expected_total(&self) -> u64 {
        self.expected_total
    }

    /// The counter value read when the tracker stopped waiting.
    #[must_use]
    pub fn actual_total(&self) -> u64 {
        self.actual_total
    }

    /// Number of units that finished their whole loop without error.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Number of units that were launched.
    #[must_use]
    pub fn task_count(&self) -> NonZero<usize> {
        self.task_count
    }

    /// Errors of the units that stopped early and had been collected when the tracker
    /// stopped waiting, ordered by unit index.
    #[must_use]
    pub fn failures(&self) -> &[UnitError] {
        &self.failures
    }

    /// How the wait ended.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Whether the tracker gave up before all units finished.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.outcome == Outcome::TimedOut
    }

    /// Compares the actual total against the expected total.
    ///
    /// Only a run that was not cut short by the timeout is checked; after a timeout the
    /// counter is not expected to be exact.
    #[must_use]
    pub fn mismatch(&self) -> Option<CounterMismatch> {
        (self.outcome == Outcome::Completed && self.actual_total != self.expected_total).then_some(
            CounterMismatch {
                expected: self.expected_total,
                actual: self.actual_total,
            },
        )
    }
}

/// The counter did not end at task count times operations per task even though every unit
/// was waited for.
///
/// This is reported as a warning. The run itself still produced a result.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
#[error("COUNTER VALUE MISMATCH! expected {expected} but counted {actual}")]
pub struct CounterMismatch {
    /// The value a correctly serialized run ends with.
    pub expected: u64,
    /// The value the counter actually held.
    pub actual: u64,
}

/// Writes the environment identification and launch parameters.
///
/// # Errors
///
/// Returns any error produced by the writer.
pub fn write_banner(
    config: &BenchmarkConfig,
    worker_threads: usize,
    out: &mut impl Write,
) -> io::Result<()> {
    writeln!(
        out,
        "Running {} v{} on the tokio multi-threaded runtime with {} worker threads",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        worker_threads
    )?;
    writeln!(
        out,
        "Launching {} tasks...",
        grouped(config.task_count().get())
    )?;
    writeln!(
        out,
        "Each task performs {} increments under high lock contention (minimal work inside lock).",
        grouped(config.ops_per_task())
    )
}

/// Writes the result of a run. Normal lines go to `out`, warnings to `err`.
///
/// Every unit failure recorded in the result is written to `err` as its own line, whether or
/// not the run timed out.
///
/// # Errors
///
/// Returns any error produced by either writer.
pub fn write_report(
    result: &BenchmarkResult,
    out: &mut impl Write,
    err: &mut impl Write,
) -> io::Result<()> {
    match result.outcome {
        Outcome::Completed => {
            writeln!(
                out,
                "{} of {} tasks completed.",
                grouped(result.completed),
                grouped(result.task_count.get())
            )?;
            writeln!(
                out,
                "Expected counter value: {}",
                grouped(result.expected_total)
            )?;
            writeln!(
                out,
                "Actual counter value:   {}",
                grouped(result.actual_total)
            )?;

            if let Some(mismatch) = result.mismatch() {
                writeln!(err, "{mismatch}")?;
            }

            writeln!(
                out,
                "Total execution time: {:.3} seconds",
                result.elapsed.as_secs_f64()
            )?;
        }
        Outcome::TimedOut => {
            writeln!(
                err,
                "Timed out after {:.3} seconds. Tasks completed: {} / {}",
                result.elapsed.as_secs_f64(),
                grouped(result.completed),
                grouped(result.task_count.get())
            )?;
            writeln!(
                out,
                "Actual counter value: {} / {}",
                grouped(result.actual_total),
                grouped(result.expected_total)
            )?;
        }
    }

    for failure in &result.failures {
        writeln!(err, "Task failed: {failure}")?;
    }

    writeln!(out, "----------------------------------------")
}

/// Formats an integer with `,` between groups of three digits.
fn grouped(value: impl fmt::Display) -> String {
    let digits = value.to_string();
    let mut formatted = String::with_capacity(digits.len().saturating_add(digits.len() / 3));

    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(digit);
    }

    formatted
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;

    fn result(outcome: Outcome, actual_total: u64) -> BenchmarkResult {
        BenchmarkResult {
            elapsed: Duration::from_millis(1_234),
            expected_total: 15_000_000,
            actual_total,
            completed: 15_000,
            task_count: nz!(15_000),
            failures: Vec::new(),
            outcome,
        }
    }

    fn render(result: &BenchmarkResult) -> (String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();

        write_report(result, &mut out, &mut err).unwrap();

        (String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
    }

    #[test]
    fn grouping() {
        assert_eq!(grouped(0), "0");
        assert_eq!(grouped(999), "999");
        assert_eq!(grouped(1_000), "1,000");
        assert_eq!(grouped(15_000), "15,000");
        assert_eq!(grouped(123_456_789_u64), "123,456,789");
    }

    #[test]
    fn completed_run_reports_totals_and_time() {
        let (out, err) = render(&result(Outcome::Completed, 15_000_000));

        assert!(out.contains("15,000 of 15,000 tasks completed."), "{out}");
        assert!(out.contains("Expected counter value: 15,000,000"), "{out}");
        assert!(out.contains("Actual counter value:   15,000,000"), "{out}");
        assert!(out.contains("Total execution time: 1.234 seconds"), "{out}");
        assert!(err.is_empty(), "{err}");
    }

    #[test]
    fn mismatch_goes_to_error_channel() {
        let result = result(Outcome::Completed, 14_999_999);
        let (out, err) = render(&result);

        assert_eq!(
            result.mismatch(),
            Some(CounterMismatch {
                expected: 15_000_000,
                actual: 14_999_999,
            })
        );
        assert!(err.contains("COUNTER VALUE MISMATCH!"), "{err}");
        assert!(!out.contains("MISMATCH"), "{out}");
    }

    #[test]
    fn timeout_is_reported_without_mismatch() {
        let result = result(Outcome::TimedOut, 42);
        let (out, err) = render(&result);

        assert!(result.timed_out());
        assert_eq!(result.mismatch(), None);
        assert!(err.contains("Timed out after 1.234 seconds"), "{err}");
        assert!(err.contains("15,000 / 15,000"), "{err}");
        assert!(out.contains("Actual counter value: 42 / 15,000,000"), "{out}");
        assert!(!err.contains("MISMATCH"), "{err}");
    }

    #[test]
    fn unit_failures_go_to_error_channel() {
        let mut completed = result(Outcome::Completed, 14_999_000);
        completed.failures = vec![UnitError::Injected { unit: 5, op: 0 }];
        let mut timed_out = result(Outcome::TimedOut, 42);
        timed_out.failures = vec![UnitError::Panicked {
            unit: 7,
            message: "boom".to_owned(),
        }];

        let (out, err) = render(&completed);
        assert!(
            err.contains("Task failed: unit 5 failed at operation 0"),
            "{err}"
        );
        assert!(!out.contains("unit 5"), "{out}");

        let (_, err) = render(&timed_out);
        assert!(err.contains("Task failed: unit 7 panicked: boom"), "{err}");
    }

    #[test]
    fn banner_names_launch_parameters() {
        let config = BenchmarkConfig::new()
            .with_task_count(nz!(10))
            .with_ops_per_task(2_500);
        let mut out = Vec::new();

        write_banner(&config, 4, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("contention_bench v"), "{out}");
        assert!(out.contains("4 worker threads"), "{out}");
        assert!(out.contains("Launching 10 tasks..."), "{out}");
        assert!(out.contains("2,500 increments"), "{out}");
    }
}
