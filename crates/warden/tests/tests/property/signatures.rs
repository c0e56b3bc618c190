//! Property tests: signatures cover exactly the signed fields.

use proptest::prelude::*;
use serde_json::json;
use warden_crypto::{InMemoryKeyring, Signable, SignedObject};
use warden_steps::{ExecutionStep, ExecutionStepCollection, WorkflowExecutionMessage};
use warden_types::{EntityId, PackageId, StepId};

fn workflow(user: EntityId, agent: EntityId, argument: &str) -> WorkflowExecutionMessage {
    let steps = ExecutionStepCollection::new().with_step(
        ExecutionStep::new(StepId::new("s1"), agent, PackageId::from_parts(1, 1, 1))
            .with_arguments(json!({ "value": argument })),
    );
    WorkflowExecutionMessage::new(user, steps)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn signed_workflow_verifies_until_arguments_change(
        original in "[a-z0-9]{1,24}",
        replacement in "[a-z0-9]{1,24}",
    ) {
        let keyring = InMemoryKeyring::new();
        let user = keyring.generate_user().unwrap();
        let agent = keyring.generate_agent().unwrap();

        let mut msg = workflow(user, agent, &original);
        msg.sign(&keyring, user, "user").unwrap();
        prop_assert!(msg.verify(&keyring));

        if let Some(step) = msg.steps.get_mut(&StepId::new("s1")) {
            step.arguments = json!({ "value": replacement });
        }
        prop_assert_eq!(msg.verify(&keyring), original == replacement);
    }

    #[test]
    fn progress_fields_never_break_the_signature(
        nonce in "[0-9a-f]{0,64}",
        next in proptest::option::of("[a-z]{1,8}"),
    ) {
        let keyring = InMemoryKeyring::new();
        let user = keyring.generate_user().unwrap();
        let agent = keyring.generate_agent().unwrap();

        let mut msg = workflow(user, agent, "fixed");
        msg.sign(&keyring, user, "user").unwrap();
        msg.nonce = nonce;
        msg.next_step = next.map(StepId::new);
        prop_assert!(msg.verify(&keyring));
    }

    #[test]
    fn signable_hash_is_deterministic(argument in "[a-z0-9]{1,24}") {
        let user = EntityId::new_user();
        let agent = EntityId::new_agent();
        let a = workflow(user, agent, &argument);
        let mut b = a.clone();
        b.nonce = "different".into();
        prop_assert_eq!(a.signable_hash().unwrap(), b.signable_hash().unwrap());
    }
}
