//! Adversarial: edits to signed content, receipts and results are caught.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use warden_crypto::SignedObject;
use warden_engine::AbortReason;
use warden_steps::{
    ExecutionStep, ExecutionStepCollection, ExecutionStepReceipt, WorkflowExecutionMessage,
};
use warden_tests::harness::{echo, rotate};
use warden_tests::{Harness, HarnessOptions};
use warden_tripwire::{IntrusionResponder, TripwireKind};
use warden_types::{PluginResult, StepId, StepOutcome};

fn branches(h: &Harness) -> ExecutionStepCollection {
    ExecutionStepCollection::new()
        .with_step(ExecutionStep::new(StepId::new("rotate"), h.agent(0), rotate()))
        .with_step(
            ExecutionStep::new(StepId::new("verify"), h.agent(1), echo())
                .child_of(StepId::new("rotate"), Some("Success")),
        )
        .with_step(
            ExecutionStep::new(StepId::new("cleanup"), h.agent(2), echo())
                .child_of(StepId::new("rotate"), Some("Failure")),
        )
}

#[tokio::test]
async fn edited_workflow_fails_signature_check() {
    let h = Harness::new(HarnessOptions::default());
    let mut msg = h.sign_workflow(branches(&h));
    if let Some(step) = msg.steps.get_mut(&StepId::new("rotate")) {
        step.arguments = json!({ "target": "prod" });
    }

    let outcome = h.deliver(h.first_hop(&msg)).await;
    assert_eq!(outcome.abort, Some(AbortReason::WorkflowSignatureInvalid));
    assert!(outcome.step_receipt.is_none());
    assert!(h.transport.is_empty());
    assert_eq!(h.audit.count(TripwireKind::WorkflowSignatureInvalid), 1);
    assert_eq!(h.loader.requests(), 0);
}

#[tokio::test]
async fn unsigned_workflow_is_refused() {
    let h = Harness::new(HarnessOptions::default());
    let msg = WorkflowExecutionMessage::new(h.user, branches(&h));

    let outcome = h.deliver(h.first_hop(&msg)).await;
    assert_eq!(outcome.abort, Some(AbortReason::WorkflowSignatureInvalid));
}

#[tokio::test]
async fn edited_receipt_fails_verification() {
    let h = Harness::new(HarnessOptions::default());
    h.deliver(h.first_hop(&h.sign_workflow(branches(&h)))).await;
    let forwarded = h.take_for(h.agent(1)).pop().expect("second hop");

    let mut msg = h.open(&forwarded);
    msg.receipts[0].result_code = "Failure".into();
    msg.next_step = Some(StepId::new("cleanup"));
    let outcome = h.deliver(h.seal(&msg, h.agent(2))).await;

    assert_eq!(
        outcome.abort,
        Some(AbortReason::ProvidedReceiptsInvalid(StepId::new("rotate")))
    );
    assert_eq!(outcome.step_outcome(), Some(StepOutcome::InvalidMessageSignature));
    assert_eq!(h.audit.count(TripwireKind::ProvidedReceiptsInvalid), 1);
}

#[tokio::test]
async fn unselected_branch_is_a_step_order_violation() {
    let h = Harness::new(HarnessOptions::default());
    h.deliver(h.first_hop(&h.sign_workflow(branches(&h)))).await;
    let forwarded = h.take_for(h.agent(1)).pop().expect("second hop");

    let mut msg = h.open(&forwarded);
    msg.next_step = Some(StepId::new("cleanup"));
    let outcome = h.deliver(h.seal(&msg, h.agent(2))).await;

    assert_eq!(
        outcome.abort,
        Some(AbortReason::StepOrderViolation(StepId::new("cleanup")))
    );
    assert_eq!(h.audit.count(TripwireKind::StepOrderViolation), 1);
    assert_eq!(h.loader.requests(), 1);
}

#[tokio::test]
async fn receipt_signed_by_the_wrong_agent_is_refused() {
    let h = Harness::new(HarnessOptions::default());
    h.deliver(h.first_hop(&h.sign_workflow(branches(&h)))).await;
    let forwarded = h.take_for(h.agent(1)).pop().expect("second hop");

    let mut msg = h.open(&forwarded);
    msg.receipts[0]
        .sign(h.keyring.as_ref(), h.agent(2), "impostor")
        .expect("re-sign");
    let outcome = h.deliver(h.seal(&msg, h.agent(1))).await;

    assert!(matches!(
        outcome.abort,
        Some(AbortReason::PreviousSignerMismatch { expected, .. }) if expected == h.agent(0)
    ));
    assert_eq!(h.audit.count(TripwireKind::PreviousSignerMismatch), 1);
}

#[tokio::test]
async fn altered_previous_result_is_detected() {
    let h = Harness::new(HarnessOptions::default());
    h.deliver(h.first_hop(&h.sign_workflow(branches(&h)))).await;
    let forwarded = h.take_for(h.agent(1)).pop().expect("second hop");

    h.workflow_receipts();

    let mut msg = h.open(&forwarded);
    if let Some(result) = msg.receipts[0].plugin_result.as_mut() {
        result.secure_outputs.insert("key".into(), json!("attacker"));
    }
    let outcome = h.deliver(h.seal(&msg, h.agent(1))).await;

    assert_eq!(
        outcome.abort,
        Some(AbortReason::PreviousResultHashMismatch(StepId::new("rotate")))
    );
    assert_eq!(outcome.step_outcome(), Some(StepOutcome::InvalidMessageSignature));
    assert_eq!(h.audit.count(TripwireKind::PreviousResultHashMismatch), 1);
    assert!(h.transport.is_empty());
}

#[tokio::test]
async fn first_hop_carrying_receipts_is_refused() {
    let h = Harness::new(HarnessOptions::default());
    let mut msg = h.sign_workflow(branches(&h));

    let mut planted = ExecutionStepReceipt::started(StepId::new("rotate"), Utc::now());
    planted
        .complete(StepOutcome::RanPluginOk, PluginResult::success(), Utc::now())
        .expect("complete");
    planted
        .sign(h.keyring.as_ref(), h.agent(0), "agent-0")
        .expect("sign");
    msg.receipts.push(planted);

    let outcome = h.deliver(h.first_hop(&msg)).await;
    assert!(matches!(outcome.abort, Some(AbortReason::StepOrderViolation(_))));
    assert_eq!(h.audit.count(TripwireKind::StepOrderViolation), 1);
}

#[tokio::test]
async fn malformed_step_graph_is_refused() {
    let h = Harness::new(HarnessOptions::default());
    let steps = ExecutionStepCollection::new()
        .with_step(ExecutionStep::new(StepId::new("rotate"), h.agent(0), rotate()))
        .with_step(
            ExecutionStep::new(StepId::new("orphan"), h.agent(1), echo())
                .child_of(StepId::new("missing"), None),
        );
    let msg = h.sign_workflow(steps);

    let outcome = h.deliver(h.first_hop(&msg)).await;
    assert!(matches!(outcome.abort, Some(AbortReason::MalformedWorkflow(_))));
    assert!(outcome.step_receipt.is_none());
}

#[tokio::test]
async fn repeated_violations_lock_the_agent_down() {
    let h = Harness::new(HarnessOptions::default());
    let responder = Arc::new(IntrusionResponder::new(2));
    h.tripwire.register(responder.clone());

    for _ in 0..2 {
        let mut msg = h.sign_workflow(branches(&h));
        msg.initiating_user = h.agent(2);
        h.deliver(h.first_hop(&msg)).await;
    }

    assert_eq!(h.audit.count(TripwireKind::WorkflowSignatureInvalid), 2);
    assert!(responder.is_locked_down(&h.agent(0)));
    assert!(!responder.is_locked_down(&h.agent(1)));
}
