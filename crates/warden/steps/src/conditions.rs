//! Execution conditions for steps and whole workflows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_types::{EntityId, StepId};

use crate::error::ConditionError;
use crate::receipt::{ExecutionStepReceipt, WorkflowReceipt};

/// A receipt a step needs to see before it may run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredReceipt {
    pub step_id: StepId,
    /// Pin the receipt to one signer.
    #[serde(default)]
    pub signer: Option<EntityId>,
    /// Pin the receipt to one result code.
    #[serde(default)]
    pub result_code: Option<String>,
}

impl RequiredReceipt {
    pub fn new(step_id: StepId) -> Self {
        Self {
            step_id,
            signer: None,
            result_code: None,
        }
    }

    pub fn signed_by(mut self, signer: EntityId) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_result_code(mut self, code: impl Into<String>) -> Self {
        self.result_code = Some(code.into());
        self
    }

    fn check(&self, receipt: &ExecutionStepReceipt) -> Result<(), ConditionError> {
        if let Some(expected) = self.signer {
            let found = receipt.signature.signer;
            if found != Some(expected) {
                return Err(ConditionError::SignerMismatch {
                    step: self.step_id.clone(),
                    expected,
                    found,
                });
            }
        }
        if let Some(expected) = &self.result_code {
            if *expected != receipt.result_code {
                return Err(ConditionError::ResultCodeMismatch {
                    step: self.step_id.clone(),
                    expected: expected.clone(),
                    found: receipt.result_code.clone(),
                });
            }
        }
        Ok(())
    }
}

fn check_validity(
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), ConditionError> {
    if let Some(from) = valid_from {
        if now < from {
            return Err(ConditionError::NotYetValid(from));
        }
    }
    if let Some(to) = valid_to {
        if now > to {
            return Err(ConditionError::Expired(to));
        }
    }
    Ok(())
}

/// Conditions attached to a single step.
///
/// Required receipts express fan-in: the step runs only once every listed
/// branch has reported, and with a window set, only if all of them executed
/// within that many seconds of each other.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStepConditions {
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub required_receipts: Vec<RequiredReceipt>,
    #[serde(default)]
    pub required_receipt_window_secs: Option<u64>,
}

impl ExecutionStepConditions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn valid_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.valid_from = Some(from);
        self.valid_to = Some(to);
        self
    }

    pub fn require(mut self, required: RequiredReceipt) -> Self {
        self.required_receipts.push(required);
        self
    }

    pub fn within_secs(mut self, window: u64) -> Self {
        self.required_receipt_window_secs = Some(window);
        self
    }

    /// Check the conditions against the receipts accumulated so far.
    ///
    /// When a step id appears more than once the latest receipt wins.
    pub fn evaluate(
        &self,
        receipts: &[ExecutionStepReceipt],
        now: DateTime<Utc>,
    ) -> Result<(), ConditionError> {
        check_validity(self.valid_from, self.valid_to, now)?;

        let mut matched = Vec::with_capacity(self.required_receipts.len());
        for required in &self.required_receipts {
            let receipt = receipts
                .iter()
                .rev()
                .find(|r| r.step_id == required.step_id)
                .ok_or_else(|| ConditionError::MissingReceipt(required.step_id.clone()))?;
            required.check(receipt)?;
            matched.push(receipt);
        }

        if let Some(window_secs) = self.required_receipt_window_secs {
            let earliest = matched.iter().map(|r| r.execution_start).min();
            let latest = matched.iter().map(|r| r.execution_end).max();
            if let (Some(earliest), Some(latest)) = (earliest, latest) {
                let spread = latest - earliest;
                let window_ms = i64::try_from(window_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
                if spread.num_milliseconds() > window_ms {
                    return Err(ConditionError::WindowExceeded {
                        spread_secs: spread.num_seconds(),
                        window_secs,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Conditions on re-running a whole workflow.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecutionConditions {
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    /// Minimum spacing between the end of one run and the start of the next.
    #[serde(default)]
    pub min_run_interval_secs: Option<u64>,
    #[serde(default)]
    pub max_runs: Option<u32>,
}

impl WorkflowExecutionConditions {
    /// Whether a new run may start given the last completed run, if any.
    pub fn accepts(
        &self,
        last_run: Option<&WorkflowReceipt>,
        now: DateTime<Utc>,
    ) -> Result<(), ConditionError> {
        check_validity(self.valid_from, self.valid_to, now)?;

        let Some(last) = last_run else {
            return Ok(());
        };

        if let Some(max) = self.max_runs {
            if last.run_count >= max {
                return Err(ConditionError::MaxRunsReached {
                    runs: last.run_count,
                    max,
                });
            }
        }

        if let (Some(min_secs), Some(finished)) = (self.min_run_interval_secs, last.completed_at()) {
            let elapsed = (now - finished).num_seconds();
            if elapsed < i64::try_from(min_secs).unwrap_or(i64::MAX) {
                return Err(ConditionError::RunTooSoon {
                    elapsed_secs: elapsed,
                    min_secs,
                });
            }
        }
        Ok(())
    }
}
