use thiserror::Error;

/// Errors raised by tripwire observers.
#[derive(Error, Debug)]
pub enum TripwireError {
    #[error("observer {observer} failed: {reason}")]
    ObserverFailed { observer: String, reason: String },

    #[error("observer state lock poisoned")]
    LockPoisoned,
}
