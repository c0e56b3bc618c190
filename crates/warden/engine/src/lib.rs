//! Warden Engine - phase-ordered workflow execution
//!
//! Each delivered [`EncryptedMessageEnvelope`](warden_crypto::EncryptedMessageEnvelope)
//! is handled by a single-use [`WorkflowProcessor`] that walks the phases of
//! [`WorkflowPhase`] in order. A phase either continues or aborts; the first
//! abort is final.
//!
//! ## Phases
//!
//! 1. **DecryptEnvelope**: open the payload as the local agent
//! 2. **ValidateHeaders**: recipient check (advisory) and workflow signature
//! 3. **CheckWorkflowPreconditions**: last-run receipt and re-run limits
//! 4. **ValidatePreviousReceiptSignatures**: every carried receipt verifies
//! 5. **EnforceStepOrder**: previous signer, nonce chain, branch admission
//! 6. **BindStep**: resolve the step this hop runs
//! 7. **ValidateStepSignatureAndGrantingUser**
//! 8. **CheckUserAccess**: agent access rules, skipped in local context
//! 9. **CheckStepConditions**: time window and required receipts
//! 10. **AcquireAndValidatePackage**: signed container, content hash
//! 11. **ExecutePlugin**: errors and panics become a failed result
//! 12. **SignReceipt**
//! 13. **CreateNextSteps**: one encrypted copy per selected child
//! 14. **FinalizeWorkflowReceipt**: scrubbed, signed, encrypted to the owner
//! 15. **SendReceipts**
//!
//! Security violations along the way are fired at the
//! [`Tripwire`](warden_tripwire::Tripwire) before the processor aborts.

#![deny(unsafe_code)]

pub mod access;
pub mod config;
pub mod error;
pub mod mocks;
pub mod package;
pub mod phase;
pub mod plugin;
pub mod processor;
pub mod telemetry;
pub mod transport;

pub use access::{AccessRule, AccessRulesProvider, AgentConfiguration};
pub use config::{merge_configuration, EngineConfig, ExecutionContext, LoggingConfig, NonceConfig};
pub use error::{AccessError, EngineError, PackageError, PluginError, TransportError};
pub use mocks::{FnPlugin, InMemoryTransport, StaticAccessRules};
pub use package::{
    CachingPackageLoader, InMemoryPackageSource, PackageContainer, PackageLoader, PackageManifest,
    PackageSource, RegistryContainer,
};
pub use phase::{AbortReason, PhaseResult, WorkflowPhase};
pub use plugin::{Plugin, PluginFactory, PluginRegistry};
pub use processor::{EngineServices, ProcessingOutcome, WorkflowEngine, WorkflowProcessor};
pub use telemetry::init_tracing;
pub use transport::Transport;
