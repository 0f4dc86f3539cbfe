use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::{FaultInjection, FaultKind, SharedState};

/// Why a unit stopped before finishing its increment loop.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum UnitError {
    /// The unit hit an injected error.
    #[error("unit {unit} failed at operation {op}: injected error")]
    Injected {
        /// Index of the failing unit.
        unit: usize,
        /// Iteration at which it failed.
        op: u64,
    },

    /// Incrementing would have wrapped the counter around.
    #[error("unit {unit} failed at operation {op}: counter would overflow")]
    CounterOverflow {
        /// Index of the failing unit.
        unit: usize,
        /// Iteration at which it failed.
        op: u64,
    },

    /// The unit panicked. The panic was caught at the unit boundary.
    #[error("unit {unit} panicked: {message}")]
    Panicked {
        /// Index of the failing unit.
        unit: usize,
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl UnitError {
    /// Index of the unit that failed.
    #[must_use]
    pub fn unit(&self) -> usize {
        match self {
            Self::Injected { unit, .. }
            | Self::CounterOverflow { unit, .. }
            | Self::Panicked { unit, .. } => *unit,
        }
    }
}

/// The increment loop of one unit.
///
/// Every iteration acquires the lock, increments once and releases the lock when the guard
/// goes out of scope. Early returns and unwinding both drop the guard.
async fn increment_loop(
    unit: usize,
    ops: u64,
    state: &SharedState,
    fault: Option<&FaultInjection>,
) -> Result<(), UnitError> {
    for op in 0..ops {
        let injected = fault
            .filter(|fault| fault.fires_at(unit, op))
            .map(FaultInjection::kind);

        if injected == Some(FaultKind::Error) {
            return Err(UnitError::Injected { unit, op });
        }

        let mut counter = state.lock_counter().await;

        if injected == Some(FaultKind::Panic) {
            panic!("injected panic in unit {unit} at operation {op}");
        }

        *counter = counter
            .checked_add(1)
            .ok_or(UnitError::CounterOverflow { unit, op })?;
    }

    Ok(())
}

/// Runs one unit to the end and records how it finished.
///
/// Errors and panics are caught here, logged with the unit index and returned to the caller
/// for reporting. They never reach other units or the dispatcher. Only a unit that finishes
/// its whole loop is counted as completed.
pub(crate) async fn supervise_unit(
    unit: usize,
    ops: u64,
    state: Arc<SharedState>,
    fault: Option<FaultInjection>,
) -> Result<(), UnitError> {
    let outcome = AssertUnwindSafe(increment_loop(unit, ops, &state, fault.as_ref()))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(UnitError::Panicked {
                unit,
                message: panic_message(payload.as_ref()),
            })
        });

    match outcome {
        Ok(()) => {
            state.record_completed();
            Ok(())
        }
        Err(error) => {
            tracing::error!(unit, %error, "unit stopped before finishing its loop");
            state.record_failed(error.clone());
            Err(error)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
