/// How an injected fault manifests inside the targeted unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum FaultKind {
    /// The unit returns an error at the start of the targeted iteration, before it
    /// tries to acquire the lock.
    Error,

    /// The unit panics during the targeted iteration while it is holding the lock, before
    /// it increments the counter. The lock is released by unwinding.
    Panic,
}

/// Makes exactly one unit fail at a fixed point of its increment loop.
///
/// The injection point is the start of iteration `at_op` (zero-based), so the failing unit
/// has always contributed exactly `at_op` increments when it fails, for either
/// [`FaultKind`]. A run that completes without timing out therefore ends with
///
/// * `N - 1` completed units, and
/// * a counter value of `(N - 1) * M + at_op`.
///
/// With `at_op == 0` the failing unit contributes nothing and the counter ends at
/// `(N - 1) * M`.
///
/// # Examples
///
/// ```
/// use contention_bench::{FaultInjection, FaultKind};
///
/// let fault = FaultInjection::new(5, 0, FaultKind::Error);
///
/// assert!(fault.fires_at(5, 0));
/// assert!(!fault.fires_at(4, 0));
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FaultInjection {
    unit: usize,
    at_op: u64,
    kind: FaultKind,
}

impl FaultInjection {
    /// Targets iteration `at_op` of unit `unit`.
    #[must_use]
    pub fn new(unit: usize, at_op: u64, kind: FaultKind) -> Self {
        Self { unit, at_op, kind }
    }

    /// Index of the unit that fails.
    #[must_use]
    pub fn unit(&self) -> usize {
        self.unit
    }

    /// Iteration at which the unit fails.
    #[must_use]
    pub fn at_op(&self) -> u64 {
        self.at_op
    }

    /// How the failure manifests.
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// Whether the fault triggers for the given unit at the given iteration.
    #[must_use]
    pub fn fires_at(&self, unit: usize, op: u64) -> bool {
        self.unit == unit && self.at_op == op
    }

    /// How many increments the failing unit performs before it fails.
    #[must_use]
    pub fn increments_before_failure(&self) -> u64 {
        self.at_op
    }
}
