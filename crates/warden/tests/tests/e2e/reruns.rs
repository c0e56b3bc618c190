//! End-to-end: running the same signed workflow again.

use warden_engine::AbortReason;
use warden_steps::{
    ExecutionStep, ExecutionStepCollection, WorkflowExecutionConditions, WorkflowExecutionMessage,
};
use warden_tests::harness::{echo, rotate};
use warden_tests::{Harness, HarnessOptions};
use warden_tripwire::TripwireKind;
use warden_types::{StepId, StepOutcome};

fn limited(h: &Harness, max_runs: u32) -> WorkflowExecutionMessage {
    let steps = ExecutionStepCollection::new()
        .with_step(ExecutionStep::new(StepId::new("rotate"), h.agent(0), rotate()))
        .with_step(
            ExecutionStep::new(StepId::new("verify"), h.agent(1), echo())
                .child_of(StepId::new("rotate"), None),
        );
    let conditions = WorkflowExecutionConditions {
        max_runs: Some(max_runs),
        ..Default::default()
    };
    h.sign(WorkflowExecutionMessage::new(h.user, steps).with_conditions(conditions))
}

#[tokio::test]
async fn rerun_with_last_receipt_succeeds() {
    let h = Harness::new(HarnessOptions::default());
    let msg = limited(&h, 3);

    h.run(h.first_hop(&msg)).await;
    let first = h.final_receipt().expect("first run receipt");
    assert_eq!(first.run_count, 1);

    let again = msg.rerun(first.clone());
    assert_eq!(again.nonce, first.next_nonce.clone().unwrap_or_default());
    let outcomes = h.run(h.first_hop(&again)).await;
    assert!(outcomes.iter().all(|o| o.is_complete()), "{:?}", outcomes[0].abort);

    let second = h.final_receipt().expect("second run receipt");
    assert_eq!(second.run_count, 2);
    assert_ne!(second.next_nonce, first.next_nonce);
}

#[tokio::test]
async fn max_runs_stops_further_runs() {
    let h = Harness::new(HarnessOptions::default());
    let msg = limited(&h, 1);

    h.run(h.first_hop(&msg)).await;
    let first = h.final_receipt().expect("first run receipt");

    let outcomes = h.run(h.first_hop(&msg.rerun(first))).await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0].abort,
        Some(AbortReason::LastRunReceiptInvalid(_))
    ));
    assert_eq!(outcomes[0].step_outcome(), Some(StepOutcome::ConditionsNotMet));
    assert_eq!(h.audit.count(TripwireKind::LastRunReceiptInvalid), 1);
}

#[tokio::test]
async fn stale_last_run_receipt_is_refused() {
    let h = Harness::new(HarnessOptions::default());
    let msg = limited(&h, 5);

    h.run(h.first_hop(&msg)).await;
    let first = h.final_receipt().expect("first run receipt");
    h.run(h.first_hop(&msg.rerun(first.clone()))).await;
    h.workflow_receipts();

    // Replaying the first run's receipt presents an already used nonce.
    let outcomes = h.run(h.first_hop(&msg.rerun(first))).await;
    assert_eq!(outcomes[0].abort, Some(AbortReason::NonceRejected));
    assert_eq!(outcomes[0].step_outcome(), Some(StepOutcome::InvalidNonce));
}

#[tokio::test]
async fn forged_last_run_receipt_is_refused() {
    let h = Harness::new(HarnessOptions::default());
    let msg = limited(&h, 2);

    h.run(h.first_hop(&msg)).await;
    let mut first = h.final_receipt().expect("first run receipt");
    first.run_count = 0;

    let outcomes = h.run(h.first_hop(&msg.rerun(first))).await;
    assert!(matches!(
        outcomes[0].abort,
        Some(AbortReason::LastRunReceiptInvalid(_))
    ));
    assert!(h.workflow_receipts().is_empty());
}

#[tokio::test]
async fn last_run_receipt_of_another_workflow_is_refused() {
    let h = Harness::new(HarnessOptions::default());
    let other = limited(&h, 5);
    h.run(h.first_hop(&other)).await;
    let foreign = h.final_receipt().expect("other workflow receipt");

    let msg = limited(&h, 5);
    let outcomes = h.run(h.first_hop(&msg.rerun(foreign))).await;
    assert!(matches!(
        outcomes[0].abort,
        Some(AbortReason::LastRunReceiptInvalid(_))
    ));
}

#[tokio::test]
async fn rerun_without_its_last_receipt_is_refused() {
    let h = Harness::new(HarnessOptions::default());
    let msg = limited(&h, 1);

    h.run(h.first_hop(&msg)).await;
    let first = h.final_receipt().expect("first run receipt");

    // Dropping the receipt would hide the run count from max_runs.
    let mut stripped = msg.rerun(first);
    stripped.last_run_receipt = None;
    let outcomes = h.run(h.first_hop(&stripped)).await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].abort, Some(AbortReason::NonceRejected));
    assert_eq!(outcomes[0].step_outcome(), Some(StepOutcome::InvalidNonce));

    // Without the nonce as well it reads as a replay of the first run.
    stripped.nonce = String::new();
    let outcomes = h.run(h.first_hop(&stripped)).await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].abort, Some(AbortReason::NonceRejected));

    assert_eq!(h.audit.count(TripwireKind::NonceCollision), 2);
    assert_eq!(h.loader.requests(), 2);
}

#[tokio::test]
async fn rerun_must_present_the_rolled_nonce() {
    let h = Harness::new(HarnessOptions::default());
    let msg = limited(&h, 3);

    h.run(h.first_hop(&msg)).await;
    let first = h.final_receipt().expect("first run receipt");

    let mut again = msg.rerun(first);
    again.nonce = "0".repeat(64);
    let outcomes = h.run(h.first_hop(&again)).await;
    assert_eq!(outcomes[0].abort, Some(AbortReason::NonceRejected));
    assert_eq!(h.audit.count(TripwireKind::NonceCollision), 1);
}
