//! Warden Types - shared vocabulary for the workflow execution engine
//!
//! Every message that crosses an agent boundary is addressed to, signed by,
//! or executed against an [`EntityId`]. Packages get a structured identifier
//! ([`PackageId`]) whose segments can be masked without a registry lookup.

#![deny(unsafe_code)]

pub mod error;
pub mod id;
pub mod result;

pub use error::TypesError;
pub use id::{EntityId, EntityKind, PackageId, StepId, WorkflowId};
pub use result::{PluginResult, StepOutcome, RESULT_FAILURE, RESULT_SUCCESS};
