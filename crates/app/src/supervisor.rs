//! Failure domains: the fault boundary owned by one extension unit.
//!
//! Everything executed on behalf of a unit (its body, subscription
//! callbacks, scheduled jobs, timers) runs through [`FailureDomain::run`].
//! A fault returned or a panic raised inside is logged against the unit and
//! stops only that task.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use busscripts_domain::error::BusScriptsError;
use busscripts_domain::id::UnitId;
use tokio::task::JoinHandle;

use crate::error::CapabilityError;

/// A runtime fault raised by unit code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Fault {
    pub message: String,
    /// Call frames, innermost first, with host frames already removed.
    pub trace: Vec<String>,
}

impl Fault {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }

    /// Build a fault from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::new(format!("panic: {message}"))
    }

    /// The top-level error this fault is logged as, attributed to `unit`.
    #[must_use]
    pub fn to_error(&self, unit: &UnitId) -> BusScriptsError {
        BusScriptsError::Runtime {
            unit: unit.to_string(),
            message: self.message.clone(),
        }
    }
}

impl From<CapabilityError> for Fault {
    fn from(err: CapabilityError) -> Self {
        Self::new(err.to_string())
    }
}

struct Inner {
    unit: UnitId,
    faults: AtomicU64,
}

/// The fault boundary of one unit. Cheap to clone; clones share the counter.
#[derive(Clone)]
pub struct FailureDomain {
    inner: Arc<Inner>,
}

impl FailureDomain {
    #[must_use]
    pub fn new(unit: UnitId) -> Self {
        Self {
            inner: Arc::new(Inner {
                unit,
                faults: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn unit(&self) -> &UnitId {
        &self.inner.unit
    }

    /// Number of faults contained so far.
    #[must_use]
    pub fn fault_count(&self) -> u64 {
        self.inner.faults.load(Ordering::Relaxed)
    }

    /// Run `f` inside the boundary. Returns `false` if it faulted.
    pub fn run<F>(&self, task: &'static str, f: F) -> bool
    where
        F: FnOnce() -> Result<(), Fault>,
    {
        self.evaluate(task, || f().map(|()| true)).is_some()
    }

    /// Run a predicate inside the boundary. `None` if it faulted.
    pub fn evaluate<F>(&self, task: &'static str, f: F) -> Option<bool>
    where
        F: FnOnce() -> Result<bool, Fault>,
    {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(fault)) => {
                self.report(task, &fault);
                None
            }
            Err(payload) => {
                self.report(task, &Fault::from_panic(payload.as_ref()));
                None
            }
        }
    }

    /// Run `f` on its own task after `delay`, inside the boundary.
    ///
    /// The task is one-shot and cannot be cancelled once spawned. It never
    /// runs on the caller's stack, even for a zero delay.
    pub fn spawn_after<F>(&self, task: &'static str, delay: Duration, f: F) -> JoinHandle<bool>
    where
        F: FnOnce() -> Result<(), Fault> + Send + 'static,
    {
        let domain = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            domain.run(task, f)
        })
    }

    /// Log a contained fault against this unit.
    pub fn report(&self, task: &'static str, fault: &Fault) {
        self.inner.faults.fetch_add(1, Ordering::Relaxed);
        let err = fault.to_error(&self.inner.unit);
        tracing::error!(
            unit = %self.inner.unit,
            task,
            trace = %fault.trace.join(" <- "),
            "{err}"
        );
    }
}

impl fmt::Debug for FailureDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureDomain")
            .field("unit", &self.inner.unit)
            .field("faults", &self.fault_count())
            .finish()
    }
}
