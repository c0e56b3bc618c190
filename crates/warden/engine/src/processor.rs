//! One delivered envelope, processed end to end.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_crypto::{CryptoBackend, Encryptable, EncryptedMessageEnvelope, SignedObject};
use warden_nonce::NonceTracker;
use warden_steps::{ExecutionStep, ExecutionStepReceipt, WorkflowExecutionMessage, WorkflowReceipt};
use warden_tripwire::{ProcessorSnapshot, Tripwire, TripwireEvent, TripwireKind};
use warden_types::{EntityId, PluginResult, StepOutcome};

use crate::access::{AccessRulesProvider, AgentConfiguration};
use crate::config::{merge_configuration, EngineConfig, ExecutionContext};
use crate::error::{PackageError, PluginError};
use crate::package::{PackageContainer, PackageLoader};
use crate::phase::{AbortReason, PhaseResult, WorkflowPhase};
use crate::transport::Transport;

/// Tolerated lead of a signing clock over the local one.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Capabilities an agent's engine runs against.
pub struct EngineServices {
    /// Identity of the local agent.
    pub agent: EntityId,
    pub agent_display: String,
    pub crypto: Arc<dyn CryptoBackend>,
    pub nonces: Arc<dyn NonceTracker>,
    pub packages: Arc<dyn PackageLoader>,
    pub access: Arc<dyn AccessRulesProvider>,
    pub transport: Arc<dyn Transport>,
    pub tripwire: Arc<Tripwire>,
    pub config: EngineConfig,
}

/// What happened to one envelope.
#[derive(Debug)]
pub struct ProcessingOutcome {
    pub thread_id: Uuid,
    /// Phase reached; the aborting phase when `abort` is set.
    pub phase: WorkflowPhase,
    pub abort: Option<AbortReason>,
    /// Signed receipt for the bound step, if one could be produced.
    pub step_receipt: Option<ExecutionStepReceipt>,
    pub next_messages: Vec<EncryptedMessageEnvelope>,
    /// Finalized workflow receipt, encrypted for the workflow owner.
    pub workflow_receipt: Option<EncryptedMessageEnvelope>,
    /// Envelopes accepted by the transport.
    pub dispatched: usize,
}

impl ProcessingOutcome {
    pub fn is_complete(&self) -> bool {
        self.abort.is_none() && self.phase.is_terminal()
    }

    pub fn step_outcome(&self) -> Option<StepOutcome> {
        self.step_receipt.as_ref().map(|r| r.outcome)
    }

    pub fn result_code(&self) -> Option<&str> {
        self.step_receipt.as_ref().map(|r| r.result_code.as_str())
    }
}

/// Entry point that hands each envelope to a fresh [`WorkflowProcessor`].
#[derive(Clone)]
pub struct WorkflowEngine {
    services: Arc<EngineServices>,
}

impl WorkflowEngine {
    pub fn new(services: EngineServices) -> Self {
        Self {
            services: Arc::new(services),
        }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    pub async fn process(&self, envelope: EncryptedMessageEnvelope) -> ProcessingOutcome {
        WorkflowProcessor::new(self.services.clone(), envelope)
            .process()
            .await
    }
}

/// Single-use state machine for one envelope.
///
/// Phases run strictly in [`WorkflowPhase`] order. The first phase to abort
/// ends processing: nothing after it runs and nothing is dispatched.
pub struct WorkflowProcessor {
    services: Arc<EngineServices>,
    envelope: EncryptedMessageEnvelope,
    phase: WorkflowPhase,
    message: Option<WorkflowExecutionMessage>,
    step: Option<ExecutionStep>,
    receipt: Option<ExecutionStepReceipt>,
    granting_user: Option<EntityId>,
    agent_config: AgentConfiguration,
    container: Option<Arc<dyn PackageContainer>>,
    rolled_nonce: Option<String>,
    complete: bool,
    next_messages: Vec<EncryptedMessageEnvelope>,
    workflow_receipt: Option<EncryptedMessageEnvelope>,
    dispatched: usize,
}

/// Whether a hop released at `issued_at` is still covered by the nonce
/// tracker's memory. Anything older would pass as a first sighting.
fn within_replay_window(
    issued_at: Option<DateTime<Utc>>,
    retention: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(issued_at) = issued_at else {
        return false;
    };
    if issued_at > now + chrono::Duration::seconds(MAX_CLOCK_SKEW_SECS) {
        return false;
    }
    match chrono::Duration::from_std(retention) {
        Ok(retention) => now - issued_at < retention,
        Err(_) => true,
    }
}

fn missing(what: &str) -> AbortReason {
    AbortReason::Internal(format!("{what} not available"))
}

impl WorkflowProcessor {
    pub fn new(services: Arc<EngineServices>, envelope: EncryptedMessageEnvelope) -> Self {
        Self {
            services,
            envelope,
            phase: WorkflowPhase::DecryptEnvelope,
            message: None,
            step: None,
            receipt: None,
            granting_user: None,
            agent_config: AgentConfiguration::default(),
            container: None,
            rolled_nonce: None,
            complete: false,
            next_messages: Vec::new(),
            workflow_receipt: None,
            dispatched: 0,
        }
    }

    pub async fn process(mut self) -> ProcessingOutcome {
        info!(
            agent = %self.services.agent,
            thread_id = %self.envelope.thread_id,
            "Processing workflow envelope"
        );

        while !self.phase.is_terminal() {
            let phase = self.phase;
            debug!(phase = %phase, thread_id = %self.envelope.thread_id, "Entering phase");

            match PhaseResult::from(self.run_phase(phase).await) {
                PhaseResult::Continue => self.phase = phase.next(),
                PhaseResult::Abort(reason) => return self.abort(reason),
            }
        }

        info!(
            workflow_id = ?self.message.as_ref().map(|m| &m.workflow_id),
            step_id = ?self.receipt.as_ref().map(|r| &r.step_id),
            result_code = ?self.receipt.as_ref().map(|r| &r.result_code),
            complete = self.complete,
            next_steps = self.next_messages.len(),
            dispatched = self.dispatched,
            "Workflow step processed"
        );
        let receipt = self.receipt.take();
        self.into_outcome(None, receipt)
    }

    async fn run_phase(&mut self, phase: WorkflowPhase) -> Result<(), AbortReason> {
        match phase {
            WorkflowPhase::DecryptEnvelope => self.decrypt_envelope(),
            WorkflowPhase::ValidateHeaders => self.validate_headers(),
            WorkflowPhase::CheckWorkflowPreconditions => self.check_workflow_preconditions(),
            WorkflowPhase::ValidatePreviousReceiptSignatures => {
                self.validate_previous_receipt_signatures()
            }
            WorkflowPhase::EnforceStepOrder => self.enforce_step_order(),
            WorkflowPhase::BindStep => self.bind_step(),
            WorkflowPhase::ValidateStepSignatureAndGrantingUser => {
                self.validate_step_signature_and_granting_user()
            }
            WorkflowPhase::CheckUserAccess => self.check_user_access(),
            WorkflowPhase::CheckStepConditions => self.check_step_conditions(),
            WorkflowPhase::AcquireAndValidatePackage => self.acquire_and_validate_package().await,
            WorkflowPhase::ExecutePlugin => self.execute_plugin().await,
            WorkflowPhase::SignReceipt => self.sign_receipt(),
            WorkflowPhase::CreateNextSteps => self.create_next_steps(),
            WorkflowPhase::FinalizeWorkflowReceipt => self.finalize_workflow_receipt(),
            WorkflowPhase::SendReceipts => {
                self.send_receipts().await;
                Ok(())
            }
            WorkflowPhase::Complete => Ok(()),
        }
    }

    fn crypto(&self) -> &dyn CryptoBackend {
        self.services.crypto.as_ref()
    }

    fn message(&self) -> Result<&WorkflowExecutionMessage, AbortReason> {
        self.message.as_ref().ok_or_else(|| missing("workflow message"))
    }

    fn step(&self) -> Result<&ExecutionStep, AbortReason> {
        self.step.as_ref().ok_or_else(|| missing("bound step"))
    }

    /// Diagnostic view of the processor for tripwire observers.
    pub fn snapshot(&self) -> ProcessorSnapshot {
        let mut snapshot = ProcessorSnapshot::new(
            self.services.agent,
            self.envelope.thread_id,
            self.phase.to_string(),
        );
        snapshot.workflow_id = self.message.as_ref().map(|m| m.workflow_id.clone());
        snapshot.step_id = self
            .step
            .as_ref()
            .map(|s| s.step_id.clone())
            .or_else(|| self.receipt.as_ref().map(|r| r.step_id.clone()));
        snapshot.granting_user = self.granting_user;
        snapshot
    }

    fn fire(&self, kind: TripwireKind, detail: impl Into<String>) {
        self.services
            .tripwire
            .fire(TripwireEvent::new(kind, self.snapshot(), detail));
    }

    fn decrypt_envelope(&mut self) -> Result<(), AbortReason> {
        let message = self
            .envelope
            .payload
            .decrypt::<WorkflowExecutionMessage>(self.crypto(), &self.services.agent)
            .map_err(|e| AbortReason::DecryptionFailed(e.to_string()))?;
        self.message = Some(message);
        Ok(())
    }

    fn validate_headers(&mut self) -> Result<(), AbortReason> {
        let agent = self.services.agent;
        let msg = self.message()?;

        match msg.current_step() {
            Some(step) if step.running_entity == agent => {}
            Some(step) => self.fire(
                TripwireKind::RecipientMismatch,
                format!("step {} names {} as running entity", step.step_id, step.running_entity),
            ),
            None => self.fire(TripwireKind::RecipientMismatch, "no step designated for this hop"),
        }

        if !msg.verify(self.crypto()) {
            self.fire(TripwireKind::WorkflowSignatureInvalid, "workflow signature does not verify");
            return Err(AbortReason::WorkflowSignatureInvalid);
        }

        let step_id = msg.current_step().map(|s| s.step_id.clone());
        self.receipt = step_id.map(|id| ExecutionStepReceipt::started(id, Utc::now()));
        Ok(())
    }

    fn check_workflow_preconditions(&mut self) -> Result<(), AbortReason> {
        let msg = self.message()?;

        if let Some(last) = &msg.last_run_receipt {
            let problem = if last.workflow_id != msg.workflow_id {
                Some("last run receipt belongs to another workflow")
            } else if !last.complete {
                Some("last run did not complete")
            } else if !last.verify(self.crypto()) {
                Some("last run receipt signature does not verify")
            } else {
                None
            };
            if let Some(problem) = problem {
                self.fire(TripwireKind::LastRunReceiptInvalid, problem);
                return Err(AbortReason::LastRunReceiptInvalid(problem.to_string()));
            }
        }

        if let Err(e) = msg
            .conditions
            .accepts(msg.last_run_receipt.as_ref(), Utc::now())
        {
            self.fire(TripwireKind::LastRunReceiptInvalid, e.to_string());
            return Err(AbortReason::LastRunReceiptInvalid(e.to_string()));
        }
        Ok(())
    }

    fn validate_previous_receipt_signatures(&mut self) -> Result<(), AbortReason> {
        let msg = self.message()?;
        if let Some(bad) = msg.receipts.iter().find(|r| !r.verify(self.crypto())) {
            self.fire(
                TripwireKind::ProvidedReceiptsInvalid,
                format!("receipt for step {} does not verify", bad.step_id),
            );
            return Err(AbortReason::ProvidedReceiptsInvalid(bad.step_id.clone()));
        }
        Ok(())
    }

    fn enforce_step_order(&mut self) -> Result<(), AbortReason> {
        let agent = self.services.agent;
        let msg = self.message()?;
        let first_hop = msg.is_first_hop();

        let (request_id, supplied) = match &msg.next_step {
            None => {
                if let Some(stray) = msg.receipts.first() {
                    self.fire(
                        TripwireKind::StepOrderViolation,
                        "first hop already carries receipts",
                    );
                    return Err(AbortReason::StepOrderViolation(stray.step_id.clone()));
                }
                // A re-run must present what the last run rolled, and only a
                // re-run may present a nonce at all.
                if msg.nonce != msg.expected_first_nonce() {
                    self.fire(
                        TripwireKind::NonceCollision,
                        "first hop nonce does not match the last run receipt",
                    );
                    return Err(AbortReason::NonceRejected);
                }
                (msg.workflow_id.to_string(), msg.nonce.clone())
            }
            Some(next) => {
                let Some(last) = msg.last_receipt() else {
                    self.fire(TripwireKind::StepOrderViolation, "later hop carries no receipts");
                    return Err(AbortReason::StepOrderViolation(next.clone()));
                };
                let Some(previous) = msg.steps.get(&last.step_id) else {
                    self.fire(
                        TripwireKind::StepOrderViolation,
                        format!("receipt for unknown step {}", last.step_id),
                    );
                    return Err(AbortReason::StepOrderViolation(next.clone()));
                };

                let signer = last.signature.signer;
                if signer != Some(previous.running_entity) {
                    self.fire(
                        TripwireKind::PreviousSignerMismatch,
                        format!("step {} receipt signed by {signer:?}", last.step_id),
                    );
                    return Err(AbortReason::PreviousSignerMismatch {
                        expected: previous.running_entity,
                        found: signer,
                    });
                }

                if msg.nonce.is_empty() || msg.nonce != last.new_nonce {
                    self.fire(
                        TripwireKind::NonceChainBroken,
                        format!("nonce not carried forward from step {}", last.step_id),
                    );
                    return Err(AbortReason::NonceChainBroken);
                }

                if !msg.steps.next_steps(last).any(|s| s.step_id == *next) {
                    self.fire(
                        TripwireKind::StepOrderViolation,
                        format!(
                            "step {next} not selected by step {} result {}",
                            last.step_id, last.result_code
                        ),
                    );
                    return Err(AbortReason::StepOrderViolation(next.clone()));
                }

                (format!("{}:{}:{}", msg.workflow_id, next, msg.nonce), msg.nonce.clone())
            }
        };

        let retention = self.services.nonces.retention();
        if !within_replay_window(msg.issued_at(), retention, Utc::now()) {
            self.fire(
                TripwireKind::NonceCollision,
                format!(
                    "{request_id} issued at {:?}, outside the {}s nonce retention",
                    msg.issued_at(),
                    retention.as_secs()
                ),
            );
            return Err(AbortReason::NonceRejected);
        }

        let minted = self
            .services
            .nonces
            .validate_nonce(&agent, &request_id, &supplied)
            .map_err(|e| AbortReason::Internal(e.to_string()))?;
        let Some(minted) = minted else {
            self.fire(TripwireKind::NonceCollision, format!("nonce rejected for {request_id}"));
            return Err(AbortReason::NonceRejected);
        };

        // Later hops keep the nonce the first hop rolled; their own mint only
        // guards this hop against redelivery.
        self.rolled_nonce = Some(if first_hop { minted } else { supplied });
        Ok(())
    }

    fn bind_step(&mut self) -> Result<(), AbortReason> {
        let msg = self.message()?;
        if let Err(e) = msg.steps.validate() {
            self.fire(TripwireKind::StepOrderViolation, e.to_string());
            return Err(AbortReason::MalformedWorkflow(e));
        }
        let Some(step) = msg.current_step().cloned() else {
            let next = msg.next_step.clone();
            self.fire(TripwireKind::StepOrderViolation, format!("step {next:?} not in workflow"));
            return Err(AbortReason::UnknownStep(next));
        };
        debug!(step_id = %step.step_id, package = %step.package_id, "Step bound");
        self.step = Some(step);
        Ok(())
    }

    fn validate_step_signature_and_granting_user(&mut self) -> Result<(), AbortReason> {
        let msg = self.message()?;
        let step = self.step()?;

        // A step signature, when present, overrides the batch signature.
        let granting = if step.is_signed() {
            if step.verify(self.crypto()) {
                step.signer()
            } else {
                None
            }
        } else {
            msg.owner()
        };

        let Some(user) = granting else {
            self.fire(
                TripwireKind::ExecutionStepSignatureInvalid,
                format!("step {} signature does not verify", step.step_id),
            );
            return Err(AbortReason::StepSignatureInvalid(step.step_id.clone()));
        };
        self.granting_user = Some(user);
        Ok(())
    }

    fn check_user_access(&mut self) -> Result<(), AbortReason> {
        let agent = self.services.agent;
        let configuration = self.services.access.get_configuration(&agent);

        if let Some(reason) = self.services.config.access_check_bypass() {
            if self.services.config.execution_context == ExecutionContext::Local {
                debug!(agent = %agent, reason, "Access rules not applied");
            } else {
                warn!(agent = %agent, reason, "Access rules bypassed by configuration");
            }
            self.agent_config = configuration.unwrap_or_else(|e| {
                warn!(agent = %agent, error = %e, "Agent configuration unavailable");
                AgentConfiguration::default()
            });
            return Ok(());
        }

        let user = self.granting_user.ok_or_else(|| missing("granting user"))?;
        let step = self.step()?;
        let allowed = match &configuration {
            Ok(config) => config.has_access(&user, &step.package_id),
            Err(_) => false,
        };
        if !allowed {
            let detail = match &configuration {
                Ok(_) => format!("user {user} has no access to package {}", step.package_id),
                Err(e) => format!("access rules unavailable: {e}"),
            };
            self.fire(TripwireKind::UserNotAuthorized, detail);
            return Err(AbortReason::UserNotAuthorized {
                user,
                step: step.step_id.clone(),
            });
        }

        self.agent_config = configuration.unwrap_or_default();
        Ok(())
    }

    fn check_step_conditions(&mut self) -> Result<(), AbortReason> {
        let msg = self.message()?;
        let step = self.step()?;
        if let Err(e) = step.conditions.evaluate(&msg.receipts, Utc::now()) {
            self.fire(TripwireKind::ConditionsNotMet, e.to_string());
            return Err(AbortReason::ConditionsNotMet(e));
        }
        Ok(())
    }

    async fn acquire_and_validate_package(&mut self) -> Result<(), AbortReason> {
        let (package, expected) = {
            let step = self.step()?;
            (step.package_id, step.package_content_hash)
        };
        let secure = self.services.config.execution_context == ExecutionContext::Agent;

        let container = match self.services.packages.load_container(&package, secure).await {
            Ok(container) => container,
            Err(e) => {
                let kind = match &e {
                    PackageError::ContentHashMismatch(_) => TripwireKind::PackageContentHashMismatch,
                    _ => TripwireKind::PackageSignaturesInvalid,
                };
                self.fire(kind, e.to_string());
                return Err(AbortReason::PackageVerificationFailed(e.to_string()));
            }
        };

        if let Some(expected) = expected {
            let container_id = container.container_id();
            let checked = self
                .services
                .packages
                .check_content_hash(&container_id, &expected)
                .await;
            if !matches!(checked, Ok(true)) {
                let detail = match checked {
                    Err(e) => e.to_string(),
                    Ok(_) => format!("container {container_id} content hash differs from {expected}"),
                };
                self.fire(TripwireKind::PackageContentHashMismatch, detail.clone());
                return Err(AbortReason::PackageVerificationFailed(detail));
            }
        }

        self.container = Some(container);
        Ok(())
    }

    async fn execute_plugin(&mut self) -> Result<(), AbortReason> {
        let previous = self.previous_result()?;
        let (package, configuration) = {
            let step = self.step()?;
            let agent_side = self.agent_config.configuration_for(&step.package_id);
            (step.package_id, merge_configuration(&agent_side, &step.arguments))
        };
        let container = self.container.clone().ok_or_else(|| missing("package container"))?;

        let run = match container.emit_plugin(&package, &configuration) {
            Ok(plugin) => AssertUnwindSafe(plugin.execute(previous.as_ref()))
                .catch_unwind()
                .await
                .unwrap_or(Err(PluginError::Panicked)),
            Err(e) => Err(e),
        };

        let (outcome, result) = match run {
            Ok(result) => (StepOutcome::RanPluginOk, result),
            Err(e) => {
                self.fire(TripwireKind::PluginExecutionFailed, e.to_string());
                (StepOutcome::RanPluginWithError, PluginResult::failure(e.to_string()))
            }
        };

        let receipt = self.receipt.as_mut().ok_or_else(|| missing("step receipt"))?;
        receipt
            .complete(outcome, result, Utc::now())
            .map_err(|e| AbortReason::Internal(e.to_string()))
    }

    /// Parent result handed to the plugin, after checking it against the
    /// hash its receipt signed.
    fn previous_result(&self) -> Result<Option<PluginResult>, AbortReason> {
        let msg = self.message()?;
        if msg.is_first_hop() {
            return Ok(None);
        }
        let Some(last) = msg.last_receipt() else {
            return Ok(None);
        };
        let Some(result) = &last.plugin_result else {
            return Ok(None);
        };
        if !last.result_matches_hash() {
            self.fire(
                TripwireKind::PreviousResultHashMismatch,
                format!("result of step {} was altered", last.step_id),
            );
            return Err(AbortReason::PreviousResultHashMismatch(last.step_id.clone()));
        }
        Ok(Some(result.clone()))
    }

    fn sign_receipt(&mut self) -> Result<(), AbortReason> {
        let rolled = self.rolled_nonce.clone().ok_or_else(|| missing("rolled nonce"))?;
        let agent = self.services.agent;
        let crypto = self.services.crypto.clone();

        let receipt = self.receipt.as_mut().ok_or_else(|| missing("step receipt"))?;
        receipt.new_nonce = rolled;
        receipt
            .sign(crypto.as_ref(), agent, &self.services.agent_display)
            .map_err(|e| AbortReason::Internal(e.to_string()))?;
        let receipt = receipt.clone();

        let msg = self.message.as_mut().ok_or_else(|| missing("workflow message"))?;
        self.complete = msg.steps.next_steps(&receipt).next().is_none();
        msg.receipts.push(receipt);
        Ok(())
    }

    fn create_next_steps(&mut self) -> Result<(), AbortReason> {
        if self.complete {
            debug!("No further steps; workflow complete");
            return Ok(());
        }
        let msg = self.message()?;
        let rolled = self.rolled_nonce.clone().ok_or_else(|| missing("rolled nonce"))?;
        let last = msg.last_receipt().ok_or_else(|| missing("signed receipt"))?;

        let mut forwarded = msg.clone();
        forwarded.nonce = rolled;
        // Only the newest result is needed downstream.
        let newest = forwarded.receipts.len().saturating_sub(1);
        for receipt in forwarded.receipts.iter_mut().take(newest) {
            *receipt = receipt.without_result();
        }

        let mut envelopes = Vec::new();
        for step in msg.steps.next_steps(last) {
            let mut copy = forwarded.clone();
            copy.next_step = Some(step.step_id.clone());
            let envelope = copy
                .seal_for(self.crypto(), &step.running_entity, Uuid::new_v4())
                .map_err(|e| AbortReason::Internal(e.to_string()))?;
            debug!(next_step = %step.step_id, recipient = %step.running_entity, "Next step prepared");
            envelopes.push(envelope);
        }
        self.next_messages = envelopes;
        Ok(())
    }

    fn finalize_workflow_receipt(&mut self) -> Result<(), AbortReason> {
        let msg = self.message()?;
        let owner = msg.owner().unwrap_or(msg.initiating_user);

        let mut receipt = WorkflowReceipt::new(msg.workflow_id.clone(), msg.run_count());
        receipt.complete = self.complete;
        receipt.receipts = msg.receipts.clone();
        if self.complete {
            receipt.next_nonce = self.rolled_nonce.clone();
        }

        let mut receipt = receipt.finalized();
        receipt
            .sign(self.crypto(), self.services.agent, &self.services.agent_display)
            .map_err(|e| AbortReason::Internal(e.to_string()))?;
        let envelope = receipt
            .seal_for(self.crypto(), &owner, self.envelope.thread_id)
            .map_err(|e| AbortReason::Internal(e.to_string()))?;
        self.workflow_receipt = Some(envelope);
        Ok(())
    }

    async fn send_receipts(&mut self) {
        let transport = self.services.transport.clone();
        let outbound: Vec<EncryptedMessageEnvelope> = self
            .next_messages
            .iter()
            .cloned()
            .chain(self.workflow_receipt.clone())
            .collect();

        let sends = outbound.into_iter().map(|envelope| {
            let transport = transport.clone();
            async move {
                let recipient = envelope.recipient();
                (recipient, transport.enqueue(envelope).await)
            }
        });

        for (recipient, result) in join_all(sends).await {
            match result {
                Ok(()) => self.dispatched += 1,
                Err(e) => warn!(recipient = %recipient, error = %e, "Dispatch failed"),
            }
        }
    }

    fn abort(mut self, reason: AbortReason) -> ProcessingOutcome {
        warn!(
            phase = %self.phase,
            reason = %reason,
            workflow_id = ?self.message.as_ref().map(|m| &m.workflow_id),
            step_id = ?self.receipt.as_ref().map(|r| &r.step_id),
            "Workflow processing aborted"
        );

        let receipt = match (self.receipt.take(), reason.outcome()) {
            (Some(receipt), _) if receipt.is_signed() => Some(receipt),
            (Some(mut receipt), Some(outcome)) => {
                receipt.refuse(outcome, Utc::now());
                match receipt.sign(self.crypto(), self.services.agent, &self.services.agent_display) {
                    Ok(()) => Some(receipt),
                    Err(e) => {
                        error!(error = %e, "Failed to sign refusal receipt");
                        None
                    }
                }
            }
            _ => None,
        };
        self.into_outcome(Some(reason), receipt)
    }

    fn into_outcome(
        self,
        abort: Option<AbortReason>,
        step_receipt: Option<ExecutionStepReceipt>,
    ) -> ProcessingOutcome {
        ProcessingOutcome {
            thread_id: self.envelope.thread_id,
            phase: self.phase,
            abort,
            step_receipt,
            next_messages: self.next_messages,
            workflow_receipt: self.workflow_receipt,
            dispatched: self.dispatched,
        }
    }
}
