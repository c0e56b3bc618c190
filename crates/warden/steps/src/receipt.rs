//! Signed evidence of what happened at each hop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_crypto::{
    ContentHash, CryptoError, Encryptable, Signable, SignableHasher, Signature, SignedObject,
};
use warden_types::{PluginResult, StepOutcome, StepId, WorkflowId};

/// Receipt for one executed (or refused) step.
///
/// `plugin_result` is left out of the signature: only its hash is signed, so
/// the result can be scrubbed later without invalidating the receipt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStepReceipt {
    pub step_id: StepId,
    /// Nonce rolled forward by this hop.
    #[serde(default)]
    pub new_nonce: String,
    pub execution_start: DateTime<Utc>,
    pub execution_end: DateTime<Utc>,
    pub outcome: StepOutcome,
    /// Branch key for child steps; the plugin's own code or the outcome name.
    pub result_code: String,
    #[serde(default)]
    pub result_hash: Option<ContentHash>,
    #[serde(default)]
    pub plugin_result: Option<PluginResult>,
    #[serde(default)]
    pub signature: Signature,
}

impl ExecutionStepReceipt {
    /// A receipt for a step whose processing started at `at`.
    ///
    /// Until completed it reads as a signature failure, the most conservative
    /// outcome.
    pub fn started(step_id: StepId, at: DateTime<Utc>) -> Self {
        Self {
            step_id,
            new_nonce: String::new(),
            execution_start: at,
            execution_end: at,
            outcome: StepOutcome::InvalidMessageSignature,
            result_code: StepOutcome::InvalidMessageSignature.as_str().to_string(),
            result_hash: None,
            plugin_result: None,
            signature: Signature::default(),
        }
    }

    /// Record a plugin run and hash its result.
    pub fn complete(
        &mut self,
        outcome: StepOutcome,
        result: PluginResult,
        at: DateTime<Utc>,
    ) -> Result<(), CryptoError> {
        self.outcome = outcome;
        self.result_code = result.result_code.clone();
        self.result_hash = Some(ContentHash::of(&result)?);
        self.plugin_result = Some(result);
        self.execution_end = at;
        Ok(())
    }

    /// Record a refusal; no plugin ran.
    pub fn refuse(&mut self, outcome: StepOutcome, at: DateTime<Utc>) {
        self.outcome = outcome;
        self.result_code = outcome.as_str().to_string();
        self.result_hash = None;
        self.plugin_result = None;
        self.execution_end = at;
    }

    /// Whether the carried plugin result still matches the signed hash.
    pub fn result_matches_hash(&self) -> bool {
        match (&self.plugin_result, &self.result_hash) {
            (Some(result), Some(hash)) => ContentHash::of(result)
                .map(|computed| computed == *hash)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Copy with secure outputs removed from the plugin result.
    pub fn scrubbed(&self) -> Self {
        Self {
            plugin_result: self.plugin_result.as_ref().map(PluginResult::scrubbed),
            ..self.clone()
        }
    }

    /// Copy with the plugin result dropped entirely.
    pub fn without_result(&self) -> Self {
        Self {
            plugin_result: None,
            ..self.clone()
        }
    }
}

impl Signable for ExecutionStepReceipt {
    const DOMAIN: &'static str = "ExecutionStepReceipt";
    const EXCLUDED_FIELDS: &'static [&'static str] = &["new_nonce", "plugin_result", "signature"];

    fn write_signable(&self, hasher: &mut SignableHasher) -> Result<(), CryptoError> {
        hasher
            .field("step_id", &self.step_id)?
            .field("execution_start", &self.execution_start)?
            .field("execution_end", &self.execution_end)?
            .field("outcome", &self.outcome)?
            .field("result_code", &self.result_code)?
            .field("result_hash", &self.result_hash)?;
        Ok(())
    }
}

impl SignedObject for ExecutionStepReceipt {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn signature_mut(&mut self) -> &mut Signature {
        &mut self.signature
    }
}

impl Encryptable for ExecutionStepReceipt {
    const MESSAGE_TYPE: &'static str = "ExecutionStepReceipt";
}

/// Per-hop summary returned to the workflow's owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReceipt {
    pub workflow_id: WorkflowId,
    pub complete: bool,
    pub run_count: u32,
    pub receipts: Vec<ExecutionStepReceipt>,
    /// Nonce to present on the next run; set once the workflow is complete.
    #[serde(default)]
    pub next_nonce: Option<String>,
    #[serde(default)]
    pub signature: Signature,
}

impl WorkflowReceipt {
    pub fn new(workflow_id: WorkflowId, run_count: u32) -> Self {
        Self {
            workflow_id,
            complete: false,
            run_count,
            receipts: Vec::new(),
            next_nonce: None,
            signature: Signature::default(),
        }
    }

    /// Copy safe to hand back to the initiator: public outputs only.
    ///
    /// Step receipt signatures survive because plugin results are outside
    /// their digest. The workflow receipt itself must be re-signed.
    pub fn finalized(&self) -> Self {
        Self {
            receipts: self.receipts.iter().map(ExecutionStepReceipt::scrubbed).collect(),
            signature: Signature::default(),
            ..self.clone()
        }
    }

    /// End of the latest step execution in this run.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.receipts.iter().map(|r| r.execution_end).max()
    }
}

impl Signable for WorkflowReceipt {
    const DOMAIN: &'static str = "WorkflowReceipt";
    const EXCLUDED_FIELDS: &'static [&'static str] = &["next_nonce", "signature"];

    fn write_signable(&self, hasher: &mut SignableHasher) -> Result<(), CryptoError> {
        hasher
            .field("workflow_id", &self.workflow_id)?
            .field("complete", &self.complete)?
            .field("run_count", &self.run_count)?;
        for receipt in &self.receipts {
            hasher
                .field_hash("receipt", &receipt.signable_hash()?)
                .field_hash("receipt_signature", &receipt.signature.record_hash()?);
        }
        Ok(())
    }
}

impl SignedObject for WorkflowReceipt {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn signature_mut(&mut self) -> &mut Signature {
        &mut self.signature
    }
}

impl Encryptable for WorkflowReceipt {
    const MESSAGE_TYPE: &'static str = "WorkflowReceipt";
}
