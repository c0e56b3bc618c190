//! Warden end-to-end test suites
//!
//! The suites live under `tests/`; this library only provides the shared
//! [`harness`].
//!
//! Run with: `cargo test -p warden-tests`

pub mod harness;

pub use harness::{Harness, HarnessOptions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_builds_requested_agents() {
        let harness = Harness::new(HarnessOptions {
            agents: 2,
            ..Default::default()
        });
        assert_eq!(harness.agents.len(), 2);
        assert_ne!(harness.agent(0), harness.agent(1));
        assert!(harness.transport.is_empty());
    }
}
