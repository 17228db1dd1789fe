//! Workflow system data structures and types
//!
//! This module provides the state chart model ([`WorkflowDefinition`]), its
//! interpreter ([`Machine`]) and the [`WorkflowRunner`] that drives a single
//! workflow instance through events while orchestrating its plugins.

mod definition;
mod event;
mod interpreter;
pub mod runner;
mod state;
mod subscriptions;
#[cfg(test)]
pub(crate) mod test_helpers;
mod transition;

pub use definition::{DefinitionError, StateNode, StateNodeType, WorkflowDefinition};
pub use event::{
    notifications, ActionStatus, WorkflowEvent, WorkflowNotification, BUILT_IN_DEEP_MERGE_CONTEXT,
    BUILT_IN_EVENTS, BUILT_IN_UPDATE_CONTEXT, ERROR, HTTP_ERROR, RULE_EVALUATION_FAILURE,
    STATE_ACTION_STATUS,
};
pub use interpreter::{Guard, GuardFailure, InterpreterError, Machine, Snapshot, TransitionOutcome};
pub use runner::{RunnerError, RunnerResult, WorkflowRunner, WorkflowRunnerBuilder};
pub use state::{StateError, StateResult, StateValue};
pub use subscriptions::{Subscriber, SubscriberError, Subscriptions};
pub use transition::{ActionRef, GuardConfig, TransitionConfig};
