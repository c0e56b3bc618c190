//! End-to-end: a workflow travelling across several agents.

use serde_json::json;
use warden_crypto::SignedObject;
use warden_engine::{EngineConfig, WorkflowPhase};
use warden_steps::{ExecutionStep, ExecutionStepCollection};
use warden_tests::harness::{echo, rotate};
use warden_tests::{Harness, HarnessOptions};
use warden_tripwire::TripwireKind;
use warden_types::{StepId, StepOutcome};

fn chain(h: &Harness) -> ExecutionStepCollection {
    ExecutionStepCollection::new()
        .with_step(ExecutionStep::new(StepId::new("rotate"), h.agent(0), rotate()))
        .with_step(
            ExecutionStep::new(StepId::new("verify"), h.agent(1), echo())
                .child_of(StepId::new("rotate"), None),
        )
        .with_step(
            ExecutionStep::new(StepId::new("report"), h.agent(2), echo())
                .child_of(StepId::new("verify"), Some("Success")),
        )
}

#[tokio::test]
async fn three_agent_chain_completes() {
    let h = Harness::new(HarnessOptions::default());
    let msg = h.sign_workflow(chain(&h));

    let outcomes = h.run(h.first_hop(&msg)).await;
    assert_eq!(outcomes.len(), 3);
    for outcome in &outcomes {
        assert!(outcome.is_complete(), "aborted: {:?}", outcome.abort);
        assert_eq!(outcome.phase, WorkflowPhase::Complete);
        assert_eq!(outcome.step_outcome(), Some(StepOutcome::RanPluginOk));
    }
    assert!(h.audit.is_empty());

    let receipts = h.workflow_receipts();
    assert_eq!(receipts.len(), 3);
    let last = receipts.iter().find(|r| r.complete).expect("final receipt");
    assert!(last.verify(h.keyring.as_ref()));
    assert_eq!(last.signature.signer, Some(h.agent(2)));
    assert_eq!(last.workflow_id, msg.workflow_id);
    assert_eq!(last.run_count, 1);
    assert!(last.next_nonce.is_some());

    let order: Vec<&str> = last.receipts.iter().map(|r| r.step_id.as_str()).collect();
    assert_eq!(order, vec!["rotate", "verify", "report"]);
    for (receipt, agent) in last.receipts.iter().zip(&h.agents) {
        assert!(receipt.verify(h.keyring.as_ref()));
        assert_eq!(receipt.signature.signer, Some(*agent));
    }
    assert_eq!(receipts.iter().filter(|r| !r.complete).count(), 2);
}

#[tokio::test]
async fn secure_outputs_reach_the_next_step_only() {
    let h = Harness::new(HarnessOptions::default());
    let msg = h.sign_workflow(chain(&h));
    h.run(h.first_hop(&msg)).await;

    let last = h.final_receipt().expect("final receipt");
    for receipt in &last.receipts {
        let result = receipt.plugin_result.as_ref().expect("result reported");
        assert!(result.secure_outputs.is_empty(), "{} leaked secure outputs", receipt.step_id);
    }

    let verify = &last.receipts[1];
    let seen = verify.plugin_result.as_ref().expect("verify result");
    assert_eq!(seen.outputs.get("saw_key"), Some(&json!("s3cret")));

    // The grandchild only sees its direct parent's result.
    let report = &last.receipts[2];
    let seen = report.plugin_result.as_ref().expect("report result");
    assert_eq!(seen.outputs.get("saw_key"), Some(&json!(null)));
}

#[tokio::test]
async fn forwarded_copies_carry_only_the_newest_result() {
    let h = Harness::new(HarnessOptions::default());
    let msg = h.sign_workflow(chain(&h));

    h.deliver(h.first_hop(&msg)).await;
    let hop2 = h.take_for(h.agent(1)).pop().expect("second hop");
    h.deliver(hop2).await;

    let hop3 = h.take_for(h.agent(2)).pop().expect("third hop");
    let forwarded = h.open(&hop3);
    assert_eq!(forwarded.receipts.len(), 2);
    assert!(forwarded.receipts[0].plugin_result.is_none());
    assert!(forwarded.receipts[1].plugin_result.is_some());
    assert_eq!(forwarded.nonce, forwarded.receipts[0].new_nonce);
    assert!(forwarded.verify(h.keyring.as_ref()));
}

#[tokio::test]
async fn fan_out_runs_every_selected_child() {
    let h = Harness::new(HarnessOptions::default());
    let steps = ExecutionStepCollection::new()
        .with_step(ExecutionStep::new(StepId::new("root"), h.agent(0), rotate()))
        .with_step(
            ExecutionStep::new(StepId::new("left"), h.agent(1), echo())
                .child_of(StepId::new("root"), None),
        )
        .with_step(
            ExecutionStep::new(StepId::new("right"), h.agent(2), echo())
                .child_of(StepId::new("root"), Some("Success")),
        );
    let msg = h.sign_workflow(steps);

    let outcomes = h.run(h.first_hop(&msg)).await;
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].next_messages.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_complete()));

    let complete = h
        .workflow_receipts()
        .into_iter()
        .filter(|r| r.complete)
        .count();
    assert_eq!(complete, 2);
}

#[tokio::test]
async fn local_context_ignores_access_rules() {
    let h = Harness::new(HarnessOptions {
        config: EngineConfig::local(),
        grant_all: false,
        ..Default::default()
    });
    let msg = h.sign_workflow(chain(&h));

    let outcomes = h.run(h.first_hop(&msg)).await;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.is_complete()));
    assert_eq!(h.audit.count(TripwireKind::UserNotAuthorized), 0);
}

#[tokio::test]
async fn scoped_grant_admits_only_its_package() {
    let h = Harness::new(HarnessOptions {
        grant_all: false,
        ..Default::default()
    });
    h.access.grant(h.agent(0), h.user, rotate());
    h.access.grant(h.agent(1), h.user, rotate());
    let msg = h.sign_workflow(chain(&h));

    let outcomes = h.run(h.first_hop(&msg)).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].is_complete());
    assert_eq!(outcomes[1].step_outcome(), Some(StepOutcome::Unauthorized));
    assert_eq!(h.audit.count(TripwireKind::UserNotAuthorized), 1);
}
