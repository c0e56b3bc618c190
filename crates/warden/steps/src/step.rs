use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_crypto::{
    ContentHash, CryptoError, Encryptable, Signable, SignableHasher, Signature, SignedObject,
};
use warden_types::{EntityId, PackageId, StepId};

use crate::conditions::ExecutionStepConditions;
use crate::receipt::ExecutionStepReceipt;

/// One planned operation in a workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: StepId,
    /// `None` for root steps.
    #[serde(default)]
    pub parent_step_id: Option<StepId>,
    /// `None` fires on any parent result.
    #[serde(default)]
    pub parent_result_code: Option<String>,
    /// Who executes this step.
    pub running_entity: EntityId,
    pub package_id: PackageId,
    /// Expected package content hash; checked before any code runs.
    #[serde(default)]
    pub package_content_hash: Option<ContentHash>,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub conditions: ExecutionStepConditions,
    #[serde(default)]
    pub signature: Signature,
}

impl ExecutionStep {
    pub fn new(step_id: StepId, running_entity: EntityId, package_id: PackageId) -> Self {
        Self {
            step_id,
            parent_step_id: None,
            parent_result_code: None,
            running_entity,
            package_id,
            package_content_hash: None,
            arguments: Value::Null,
            conditions: ExecutionStepConditions::default(),
            signature: Signature::default(),
        }
    }

    /// Make this a child of `parent`, optionally gated on a result code.
    pub fn child_of(mut self, parent: StepId, result_code: Option<&str>) -> Self {
        self.parent_step_id = Some(parent);
        self.parent_result_code = result_code.map(str::to_string);
        self
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_content_hash(mut self, hash: ContentHash) -> Self {
        self.package_content_hash = Some(hash);
        self
    }

    pub fn with_conditions(mut self, conditions: ExecutionStepConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_step_id.is_none()
    }

    /// Whether this step is the branch selected by `receipt`.
    pub fn fires_after(&self, receipt: &ExecutionStepReceipt) -> bool {
        if self.parent_step_id.as_ref() != Some(&receipt.step_id) {
            return false;
        }
        match &self.parent_result_code {
            None => true,
            Some(code) => *code == receipt.result_code,
        }
    }
}

impl Signable for ExecutionStep {
    const DOMAIN: &'static str = "ExecutionStep";
    const EXCLUDED_FIELDS: &'static [&'static str] = &["signature"];

    fn write_signable(&self, hasher: &mut SignableHasher) -> Result<(), CryptoError> {
        hasher
            .field("step_id", &self.step_id)?
            .field("parent_step_id", &self.parent_step_id)?
            .field("parent_result_code", &self.parent_result_code)?
            .field("running_entity", &self.running_entity)?
            .field("package_id", &self.package_id)?
            .field("package_content_hash", &self.package_content_hash)?
            .field("arguments", &self.arguments)?
            .field("conditions", &self.conditions)?;
        Ok(())
    }
}

impl SignedObject for ExecutionStep {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn signature_mut(&mut self) -> &mut Signature {
        &mut self.signature
    }
}

impl Encryptable for ExecutionStep {
    const MESSAGE_TYPE: &'static str = "ExecutionStep";
}
