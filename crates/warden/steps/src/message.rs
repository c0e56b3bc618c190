//! The signed workflow message that travels between agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_crypto::{CryptoError, Encryptable, Signable, SignableHasher, Signature, SignedObject};
use warden_types::{EntityId, StepId, WorkflowId};

use crate::collection::ExecutionStepCollection;
use crate::conditions::WorkflowExecutionConditions;
use crate::receipt::{ExecutionStepReceipt, WorkflowReceipt};
use crate::step::ExecutionStep;

/// A workflow authorised by its initiating user.
///
/// The user signs the plan once. Each hop then rewrites only the unsigned
/// progress fields (`receipts`, `next_step`, `nonce`, `last_run_receipt`),
/// which therefore never invalidate that signature. Nonces in particular
/// travel unauthenticated; their integrity comes from the nonce tracker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionMessage {
    pub workflow_id: WorkflowId,
    pub initiating_user: EntityId,
    pub steps: ExecutionStepCollection,
    #[serde(default)]
    pub conditions: WorkflowExecutionConditions,
    /// Receipts of every step executed so far in this run.
    #[serde(default)]
    pub receipts: Vec<ExecutionStepReceipt>,
    /// Step this copy is addressed to run; `None` on the first hop.
    #[serde(default)]
    pub next_step: Option<StepId>,
    #[serde(default)]
    pub nonce: String,
    /// Receipt of the previous completed run, for re-run conditions.
    #[serde(default)]
    pub last_run_receipt: Option<WorkflowReceipt>,
    #[serde(default)]
    pub signature: Signature,
}

impl WorkflowExecutionMessage {
    pub fn new(initiating_user: EntityId, steps: ExecutionStepCollection) -> Self {
        Self {
            workflow_id: WorkflowId::generate(),
            initiating_user,
            steps,
            conditions: WorkflowExecutionConditions::default(),
            receipts: Vec::new(),
            next_step: None,
            nonce: String::new(),
            last_run_receipt: None,
            signature: Signature::default(),
        }
    }

    pub fn with_conditions(mut self, conditions: WorkflowExecutionConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn is_first_hop(&self) -> bool {
        self.next_step.is_none()
    }

    /// The step this copy asks the recipient to run.
    pub fn current_step(&self) -> Option<&ExecutionStep> {
        match &self.next_step {
            Some(id) => self.steps.get(id),
            None => self.steps.first_root(),
        }
    }

    pub fn last_receipt(&self) -> Option<&ExecutionStepReceipt> {
        self.receipts.last()
    }

    /// The entity that authorised the workflow, once signed.
    pub fn owner(&self) -> Option<EntityId> {
        self.signature.signer
    }

    /// Signed time this hop was released.
    ///
    /// A later hop dates from the preceding receipt, a re-run from the
    /// completion of the last run, and a first run from the workflow
    /// signature. `None` when the anchoring signature carries no timestamp.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        match (&self.next_step, &self.last_run_receipt) {
            (Some(_), _) => self.last_receipt().and_then(|r| r.signature.timestamp),
            (None, Some(last)) => last.signature.timestamp,
            (None, None) => self.signature.timestamp,
        }
    }

    /// Nonce a first hop must present: the last run's rolled nonce, or
    /// nothing for the first run.
    pub fn expected_first_nonce(&self) -> &str {
        self.last_run_receipt
            .as_ref()
            .and_then(|last| last.next_nonce.as_deref())
            .unwrap_or("")
    }

    /// Run number this execution will be recorded as.
    pub fn run_count(&self) -> u32 {
        self.last_run_receipt
            .as_ref()
            .map_or(1, |last| last.run_count.saturating_add(1))
    }

    /// Fresh copy for the next run: progress cleared, `last_run` attached.
    pub fn rerun(&self, last_run: WorkflowReceipt) -> Self {
        Self {
            receipts: Vec::new(),
            next_step: None,
            nonce: last_run.next_nonce.clone().unwrap_or_default(),
            last_run_receipt: Some(last_run),
            ..self.clone()
        }
    }
}

impl Signable for WorkflowExecutionMessage {
    const DOMAIN: &'static str = "WorkflowExecutionMessage";
    const EXCLUDED_FIELDS: &'static [&'static str] = &[
        "receipts",
        "next_step",
        "nonce",
        "last_run_receipt",
        "signature",
    ];

    fn write_signable(&self, hasher: &mut SignableHasher) -> Result<(), CryptoError> {
        hasher
            .field("workflow_id", &self.workflow_id)?
            .field("initiating_user", &self.initiating_user)?;
        // Step signatures stay outside the workflow digest; a step signed
        // after the batch must not invalidate it.
        for step in &self.steps {
            hasher.field_hash("step", &step.signable_hash()?);
        }
        hasher.field("conditions", &self.conditions)?;
        Ok(())
    }
}

impl SignedObject for WorkflowExecutionMessage {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn signature_mut(&mut self) -> &mut Signature {
        &mut self.signature
    }
}

impl Encryptable for WorkflowExecutionMessage {
    const MESSAGE_TYPE: &'static str = "WorkflowExecutionMessage";
}
