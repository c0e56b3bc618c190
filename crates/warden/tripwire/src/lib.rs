//! Warden Tripwire - security violation fan-out
//!
//! When the workflow processor detects a broken security invariant it fires a
//! [`TripwireEvent`] at the [`Tripwire`]. Every registered observer is called
//! synchronously and independently: an observer that errors or panics is
//! logged and skipped, and never stops the others or the processor's abort
//! path. With nobody listening the event is logged at error level so that a
//! violation is never silently swallowed.

#![deny(unsafe_code)]

pub mod error;
pub mod event;
pub mod observers;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, warn};

pub use error::TripwireError;
pub use event::{ProcessorSnapshot, TripwireEvent, TripwireKind};
pub use observers::{AuditTrail, IntrusionResponder};

/// Callback notified of every tripwire event.
pub trait TripwireObserver: Send + Sync {
    fn name(&self) -> &str;

    fn on_tripwire(&self, event: &TripwireEvent) -> Result<(), TripwireError>;
}

/// Fan-out point for security violations.
#[derive(Default)]
pub struct Tripwire {
    observers: RwLock<Vec<Arc<dyn TripwireObserver>>>,
}

impl Tripwire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(self, observer: Arc<dyn TripwireObserver>) -> Self {
        self.register(observer);
        self
    }

    pub fn register(&self, observer: Arc<dyn TripwireObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Notify every observer. Returns how many handled the event cleanly.
    pub fn fire(&self, event: TripwireEvent) -> usize {
        // Snapshot the list so observers may register others without deadlock.
        let observers: Vec<Arc<dyn TripwireObserver>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if observers.is_empty() {
            error!(
                kind = %event.kind,
                agent = %event.snapshot.agent,
                workflow_id = ?event.snapshot.workflow_id,
                step_id = ?event.snapshot.step_id,
                phase = %event.snapshot.phase,
                detail = %event.detail,
                "Tripwire fired with no observers registered"
            );
            return 0;
        }

        warn!(
            kind = %event.kind,
            agent = %event.snapshot.agent,
            workflow_id = ?event.snapshot.workflow_id,
            step_id = ?event.snapshot.step_id,
            phase = %event.snapshot.phase,
            detail = %event.detail,
            "Tripwire fired"
        );

        let mut handled = 0;
        for observer in &observers {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_tripwire(&event))) {
                Ok(Ok(())) => handled += 1,
                Ok(Err(e)) => {
                    error!(observer = observer.name(), kind = %event.kind, error = %e, "Tripwire observer failed");
                }
                Err(_) => {
                    error!(observer = observer.name(), kind = %event.kind, "Tripwire observer panicked");
                }
            }
        }
        handled
    }
}
