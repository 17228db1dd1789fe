//! Events sent into a workflow and notifications sent out of it

use crate::workflow::StateValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Replaces the whole context with `payload.context`
pub const BUILT_IN_UPDATE_CONTEXT: &str = "BUILT_IN_UPDATE_CONTEXT";

/// Deep merges `payload.newContext` using `payload.arrayMergeOption`
pub const BUILT_IN_DEEP_MERGE_CONTEXT: &str = "BUILT_IN_DEEP_MERGE_CONTEXT";

/// Built-in events, legal in every state
pub const BUILT_IN_EVENTS: [&str; 2] = [BUILT_IN_UPDATE_CONTEXT, BUILT_IN_DEEP_MERGE_CONTEXT];

/// Notification names subscribers can listen to
pub mod notifications {
    /// A transition changed the state
    pub const STATE_UPDATE: &str = "STATE_UPDATE";
    /// Progress of a state plugin (`PENDING`, `SUCCESS`, `ERROR`)
    pub const STATUS_UPDATE: &str = "STATUS_UPDATE";
    /// A guard with `assignOnFailure` rejected a transition
    pub const EVALUATION_ERROR: &str = "EVALUATION_ERROR";
}

/// Notification `type` of state plugin status updates
pub const STATE_ACTION_STATUS: &str = "STATE_ACTION_STATUS";

/// Notification `type` of guard rejections
pub const RULE_EVALUATION_FAILURE: &str = "RULE_EVALUATION_FAILURE";

/// Notification `type` following a failed state plugin whose error is HTTP-class
pub const HTTP_ERROR: &str = "HTTP_ERROR";

/// Notification `type` following any other failed state plugin
pub const ERROR: &str = "ERROR";

/// An event sent to a workflow runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Event name, matched against the `on` maps of active states
    #[serde(rename = "type")]
    pub event_type: String,
    /// Optional data, visible to guards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl WorkflowEvent {
    /// An event without payload
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: None,
        }
    }

    /// An event carrying `payload`
    pub fn with_payload(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Some(payload),
        }
    }

    /// Whether this is one of the built-in context events
    pub fn is_built_in(&self) -> bool {
        BUILT_IN_EVENTS.contains(&self.event_type.as_str())
    }
}

/// Status carried by state plugin notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionStatus {
    /// About to run
    Pending,
    /// Finished without error
    Success,
    /// Failed
    Error,
}

/// Message delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNotification {
    /// Event type that caused the notification, or a status type
    #[serde(rename = "type")]
    pub notification_type: String,
    /// State the workflow is in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateValue>,
    /// Event payload or status details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error message when reporting a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Context at the time of a state change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl WorkflowNotification {
    /// A notification of the given type
    pub fn new(notification_type: impl Into<String>) -> Self {
        Self {
            notification_type: notification_type.into(),
            state: None,
            payload: None,
            error: None,
            context: None,
        }
    }

    /// Attach the state
    pub fn state(mut self, state: StateValue) -> Self {
        self.state = Some(state);
        self
    }

    /// Attach a payload
    pub fn payload(mut self, payload: Option<Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Attach an error message
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach the context
    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Status payload of state plugin notifications
    pub fn status(&self) -> Option<ActionStatus> {
        self.payload
            .as_ref()
            .and_then(|p| p.get("status"))
            .and_then(|s| serde_json::from_value(s.clone()).ok())
    }
}
