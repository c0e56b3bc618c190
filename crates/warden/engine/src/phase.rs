use std::fmt;

use warden_steps::{ConditionError, StepError};
use warden_types::{EntityId, StepId, StepOutcome};

/// Processing phases, in the only order they may run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkflowPhase {
    DecryptEnvelope,
    ValidateHeaders,
    CheckWorkflowPreconditions,
    ValidatePreviousReceiptSignatures,
    EnforceStepOrder,
    BindStep,
    ValidateStepSignatureAndGrantingUser,
    CheckUserAccess,
    CheckStepConditions,
    AcquireAndValidatePackage,
    ExecutePlugin,
    SignReceipt,
    CreateNextSteps,
    FinalizeWorkflowReceipt,
    SendReceipts,
    Complete,
}

impl WorkflowPhase {
    pub fn next(self) -> Self {
        use WorkflowPhase::*;
        match self {
            DecryptEnvelope => ValidateHeaders,
            ValidateHeaders => CheckWorkflowPreconditions,
            CheckWorkflowPreconditions => ValidatePreviousReceiptSignatures,
            ValidatePreviousReceiptSignatures => EnforceStepOrder,
            EnforceStepOrder => BindStep,
            BindStep => ValidateStepSignatureAndGrantingUser,
            ValidateStepSignatureAndGrantingUser => CheckUserAccess,
            CheckUserAccess => CheckStepConditions,
            CheckStepConditions => AcquireAndValidatePackage,
            AcquireAndValidatePackage => ExecutePlugin,
            ExecutePlugin => SignReceipt,
            SignReceipt => CreateNextSteps,
            CreateNextSteps => FinalizeWorkflowReceipt,
            FinalizeWorkflowReceipt => SendReceipts,
            SendReceipts => Complete,
            Complete => Complete,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == WorkflowPhase::Complete
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of running one phase.
#[derive(Clone, Debug, PartialEq)]
pub enum PhaseResult {
    Continue,
    Abort(AbortReason),
}

impl From<Result<(), AbortReason>> for PhaseResult {
    fn from(result: Result<(), AbortReason>) -> Self {
        match result {
            Ok(()) => PhaseResult::Continue,
            Err(reason) => PhaseResult::Abort(reason),
        }
    }
}

/// Why processing stopped early.
#[derive(Clone, Debug, PartialEq)]
pub enum AbortReason {
    DecryptionFailed(String),
    WorkflowSignatureInvalid,
    LastRunReceiptInvalid(String),
    ProvidedReceiptsInvalid(StepId),
    NonceRejected,
    NonceChainBroken,
    PreviousSignerMismatch {
        expected: EntityId,
        found: Option<EntityId>,
    },
    StepOrderViolation(StepId),
    MalformedWorkflow(StepError),
    UnknownStep(Option<StepId>),
    StepSignatureInvalid(StepId),
    UserNotAuthorized {
        user: EntityId,
        step: StepId,
    },
    ConditionsNotMet(ConditionError),
    PackageVerificationFailed(String),
    PreviousResultHashMismatch(StepId),
    /// A capability (backend, tracker, provider) failed outright.
    Internal(String),
}

impl AbortReason {
    /// Outcome recorded on the step receipt, or `None` when no receipt can
    /// be produced.
    pub fn outcome(&self) -> Option<StepOutcome> {
        match self {
            Self::DecryptionFailed(_)
            | Self::WorkflowSignatureInvalid
            | Self::MalformedWorkflow(_)
            | Self::UnknownStep(_)
            | Self::Internal(_) => None,
            Self::LastRunReceiptInvalid(_) | Self::ConditionsNotMet(_) => {
                Some(StepOutcome::ConditionsNotMet)
            }
            Self::ProvidedReceiptsInvalid(_)
            | Self::PreviousSignerMismatch { .. }
            | Self::StepOrderViolation(_)
            | Self::StepSignatureInvalid(_)
            | Self::PreviousResultHashMismatch(_) => Some(StepOutcome::InvalidMessageSignature),
            Self::NonceRejected | Self::NonceChainBroken => Some(StepOutcome::InvalidNonce),
            Self::UserNotAuthorized { .. } => Some(StepOutcome::Unauthorized),
            Self::PackageVerificationFailed(_) => Some(StepOutcome::PackageVerificationFailed),
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DecryptionFailed(e) => write!(f, "envelope decryption failed: {e}"),
            Self::WorkflowSignatureInvalid => write!(f, "workflow signature invalid"),
            Self::LastRunReceiptInvalid(e) => write!(f, "last run receipt rejected: {e}"),
            Self::ProvidedReceiptsInvalid(step) => write!(f, "receipt for step {step} does not verify"),
            Self::NonceRejected => write!(f, "nonce rejected"),
            Self::NonceChainBroken => write!(f, "nonce was not carried forward"),
            Self::PreviousSignerMismatch { expected, found } => {
                write!(f, "previous receipt signed by {found:?}, expected {expected}")
            }
            Self::StepOrderViolation(step) => write!(f, "step {step} is not admitted by the previous result"),
            Self::MalformedWorkflow(e) => write!(f, "malformed step graph: {e}"),
            Self::UnknownStep(step) => write!(f, "step {step:?} not found in workflow"),
            Self::StepSignatureInvalid(step) => write!(f, "step {step} has no valid authorising signature"),
            Self::UserNotAuthorized { user, step } => write!(f, "user {user} may not run step {step}"),
            Self::ConditionsNotMet(e) => write!(f, "step conditions not met: {e}"),
            Self::PackageVerificationFailed(e) => write!(f, "package verification failed: {e}"),
            Self::PreviousResultHashMismatch(step) => {
                write!(f, "result of step {step} does not match its signed hash")
            }
            Self::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}
