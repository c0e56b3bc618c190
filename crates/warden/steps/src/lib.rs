//! Warden Steps - what a workflow is made of
//!
//! A workflow is a signed [`WorkflowExecutionMessage`] carrying an
//! [`ExecutionStepCollection`]: a DAG whose edges are selected by the parent
//! step's result code. As the message hops from agent to agent it accumulates
//! signed [`ExecutionStepReceipt`]s; only its unsigned fields change on the way.

#![deny(unsafe_code)]

pub mod collection;
pub mod conditions;
pub mod error;
pub mod message;
pub mod receipt;
pub mod step;

pub use collection::ExecutionStepCollection;
pub use conditions::{ExecutionStepConditions, RequiredReceipt, WorkflowExecutionConditions};
pub use error::{ConditionError, StepError};
pub use message::WorkflowExecutionMessage;
pub use receipt::{ExecutionStepReceipt, WorkflowReceipt};
pub use step::ExecutionStep;
