//! End-to-end: result codes select the branch that runs next.

use serde_json::json;
use warden_steps::{ExecutionStep, ExecutionStepCollection};
use warden_tests::harness::{echo, fail};
use warden_tests::{Harness, HarnessOptions};
use warden_tripwire::TripwireKind;
use warden_types::{StepId, StepOutcome, RESULT_FAILURE};

fn review(h: &Harness, verdict: &str) -> ExecutionStepCollection {
    ExecutionStepCollection::new()
        .with_step(
            ExecutionStep::new(StepId::new("review"), h.agent(0), echo())
                .with_arguments(json!({ "code": verdict })),
        )
        .with_step(
            ExecutionStep::new(StepId::new("approve"), h.agent(1), echo())
                .child_of(StepId::new("review"), Some("Approve")),
        )
        .with_step(
            ExecutionStep::new(StepId::new("deny"), h.agent(2), echo())
                .child_of(StepId::new("review"), Some("Deny")),
        )
}

#[tokio::test]
async fn result_code_selects_matching_child() {
    let h = Harness::new(HarnessOptions::default());
    let msg = h.sign_workflow(review(&h, "Deny"));

    let outcomes = h.run(h.first_hop(&msg)).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].result_code(), Some("Deny"));

    let last = h.final_receipt().expect("final receipt");
    let ran: Vec<&str> = last.receipts.iter().map(|r| r.step_id.as_str()).collect();
    assert_eq!(ran, vec!["review", "deny"]);
}

#[tokio::test]
async fn unmatched_result_code_ends_the_workflow() {
    let h = Harness::new(HarnessOptions::default());
    let msg = h.sign_workflow(review(&h, "Escalate"));

    let outcomes = h.run(h.first_hop(&msg)).await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].next_messages.is_empty());

    let last = h.final_receipt().expect("final receipt");
    assert_eq!(last.receipts.len(), 1);
    assert_eq!(last.receipts[0].result_code, "Escalate");
}

#[tokio::test]
async fn failed_plugin_takes_the_failure_branch() {
    let h = Harness::new(HarnessOptions::default());
    let steps = ExecutionStepCollection::new()
        .with_step(ExecutionStep::new(StepId::new("deploy"), h.agent(0), fail()))
        .with_step(
            ExecutionStep::new(StepId::new("rollback"), h.agent(1), echo())
                .child_of(StepId::new("deploy"), Some(RESULT_FAILURE)),
        )
        .with_step(
            ExecutionStep::new(StepId::new("announce"), h.agent(2), echo())
                .child_of(StepId::new("deploy"), Some("Success")),
        );
    let msg = h.sign_workflow(steps);

    let outcomes = h.run(h.first_hop(&msg)).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].step_outcome(), Some(StepOutcome::RanPluginWithError));
    assert_eq!(outcomes[1].step_outcome(), Some(StepOutcome::RanPluginOk));
    assert_eq!(h.audit.count(TripwireKind::PluginExecutionFailed), 1);

    let last = h.final_receipt().expect("final receipt");
    let failed = last.receipts[0].plugin_result.as_ref().expect("failure result");
    assert_eq!(failed.result_code, RESULT_FAILURE);
    assert!(failed.message.is_some());
    assert_eq!(last.receipts[1].step_id, StepId::new("rollback"));
}

#[tokio::test]
async fn agent_configuration_backs_step_arguments() {
    let h = Harness::new(HarnessOptions::default());
    h.access
        .configure_package(h.agent(0), echo().container_id(), json!({ "code": "Approve" }));
    let mut steps = review(&h, "unused");
    if let Some(step) = steps.get_mut(&StepId::new("review")) {
        step.arguments = serde_json::Value::Null;
    }
    let msg = h.sign_workflow(steps);

    let outcomes = h.run(h.first_hop(&msg)).await;
    assert_eq!(outcomes[0].result_code(), Some("Approve"));
    let last = h.final_receipt().expect("final receipt");
    assert_eq!(last.receipts[1].step_id, StepId::new("approve"));
}
