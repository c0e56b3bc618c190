use thiserror::Error;
use warden_types::{EntityId, StepId};

/// Structural problems in a step graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("duplicate step id: {0}")]
    DuplicateStep(StepId),

    #[error("step {step} references unknown parent {parent}")]
    UnknownParent { step: StepId, parent: StepId },

    #[error("step {0} is part of a cycle")]
    Cycle(StepId),

    #[error("workflow has no root step")]
    NoRoot,
}

/// Why a step's or workflow's execution conditions were not met.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("not valid before {0}")]
    NotYetValid(chrono::DateTime<chrono::Utc>),

    #[error("expired at {0}")]
    Expired(chrono::DateTime<chrono::Utc>),

    #[error("required receipt for step {0} is missing")]
    MissingReceipt(StepId),

    #[error("receipt for step {step} signed by {found:?}, expected {expected}")]
    SignerMismatch {
        step: StepId,
        expected: EntityId,
        found: Option<EntityId>,
    },

    #[error("receipt for step {step} has result code {found}, expected {expected}")]
    ResultCodeMismatch {
        step: StepId,
        expected: String,
        found: String,
    },

    #[error("required receipts span {spread_secs}s, window is {window_secs}s")]
    WindowExceeded { spread_secs: i64, window_secs: u64 },

    #[error("last run was {elapsed_secs}s ago, minimum interval is {min_secs}s")]
    RunTooSoon { elapsed_secs: i64, min_secs: u64 },

    #[error("workflow already ran {runs} times, maximum is {max}")]
    MaxRunsReached { runs: u32, max: u32 },
}
