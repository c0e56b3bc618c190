use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_types::{EntityId, StepId, WorkflowId};

/// Security invariants whose violation trips the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripwireKind {
    /// The step to run names another agent. Logged, not fatal.
    RecipientMismatch,
    WorkflowSignatureInvalid,
    LastRunReceiptInvalid,
    ProvidedReceiptsInvalid,
    NonceCollision,
    /// A later hop arrived without the nonce the previous hop rolled.
    NonceChainBroken,
    PreviousSignerMismatch,
    /// The bound step is not a child the previous result selects.
    StepOrderViolation,
    ExecutionStepSignatureInvalid,
    UserNotAuthorized,
    ConditionsNotMet,
    PackageSignaturesInvalid,
    PackageContentHashMismatch,
    PreviousResultHashMismatch,
    /// The plugin raised. The pipeline still signs a failure receipt.
    PluginExecutionFailed,
}

impl TripwireKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecipientMismatch => "RecipientMismatch",
            Self::WorkflowSignatureInvalid => "WorkflowSignatureInvalid",
            Self::LastRunReceiptInvalid => "LastRunReceiptInvalid",
            Self::ProvidedReceiptsInvalid => "ProvidedReceiptsInvalid",
            Self::NonceCollision => "NonceCollision",
            Self::NonceChainBroken => "NonceChainBroken",
            Self::PreviousSignerMismatch => "PreviousSignerMismatch",
            Self::StepOrderViolation => "StepOrderViolation",
            Self::ExecutionStepSignatureInvalid => "ExecutionStepSignatureInvalid",
            Self::UserNotAuthorized => "UserNotAuthorized",
            Self::ConditionsNotMet => "ConditionsNotMet",
            Self::PackageSignaturesInvalid => "PackageSignaturesInvalid",
            Self::PackageContentHashMismatch => "PackageContentHashMismatch",
            Self::PreviousResultHashMismatch => "PreviousResultHashMismatch",
            Self::PluginExecutionFailed => "PluginExecutionFailed",
        }
    }

    /// Whether the pipeline keeps going after this violation.
    pub fn is_advisory(&self) -> bool {
        matches!(self, Self::RecipientMismatch | Self::PluginExecutionFailed)
    }
}

impl fmt::Display for TripwireKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the workflow processor at the moment a tripwire fired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorSnapshot {
    /// Agent running the processor.
    pub agent: EntityId,
    pub thread_id: Uuid,
    pub workflow_id: Option<WorkflowId>,
    pub step_id: Option<StepId>,
    /// Signer whose authority was in force, once known.
    pub granting_user: Option<EntityId>,
    pub phase: String,
}

impl ProcessorSnapshot {
    pub fn new(agent: EntityId, thread_id: Uuid, phase: impl Into<String>) -> Self {
        Self {
            agent,
            thread_id,
            workflow_id: None,
            step_id: None,
            granting_user: None,
            phase: phase.into(),
        }
    }
}

/// One security violation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripwireEvent {
    pub id: Uuid,
    pub kind: TripwireKind,
    pub snapshot: ProcessorSnapshot,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl TripwireEvent {
    pub fn new(kind: TripwireKind, snapshot: ProcessorSnapshot, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            snapshot,
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}
