//! Collaborators injected at runner construction
//!
//! Risk rule evaluation, child workflow creation and UI token issuance need
//! capabilities (storage, cross-workflow orchestration) that live outside the
//! engine. Plugins reach them through these traits.

use crate::plugins::PluginError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Input of a risk rules evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskRulesRequest {
    /// Plugin input: context plus runtime config and id
    pub context: Value,
    /// Opaque description of where the rules live
    pub rules_source: Value,
}

/// Evaluates risk rules against a workflow context
#[async_trait]
pub trait RiskRulesInvoker: Send + Sync {
    /// Return the rule results, merged as the plugin response
    async fn invoke(&self, request: RiskRulesRequest) -> Result<Value, PluginError>;
}

/// How a child workflow is started
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildInitOptions {
    /// Event sent right after creation
    pub event: Option<String>,
    /// Initial context of the child
    pub context: Value,
}

/// Input of a child workflow creation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildWorkflowRequest {
    /// Runtime id of the parent
    pub parent_workflow_runtime_id: String,
    /// Runtime config of the parent
    pub parent_workflow_runtime_config: Value,
    /// Definition of the child
    pub definition_id: String,
    /// Start options
    pub init_options: ChildInitOptions,
}

/// Creates child workflows
#[async_trait]
pub trait ChildWorkflowInvoker: Send + Sync {
    /// Create and start the child workflow
    async fn invoke(&self, request: ChildWorkflowRequest) -> Result<(), PluginError>;
}

/// Input of a UI token issuance
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTokenRequest {
    /// UI definition the token grants access to
    pub ui_definition_id: String,
    /// Token lifetime
    pub expire_in_minutes: Option<u64>,
    /// Plugin input: context plus runtime config and id
    pub context: Value,
}

/// Issues UI access tokens bound to a workflow
#[async_trait]
pub trait WorkflowTokenInvoker: Send + Sync {
    /// Issue a token; the returned value is merged as the plugin response
    async fn invoke(&self, request: WorkflowTokenRequest) -> Result<Value, PluginError>;
}

/// Stands in for every callback when no real collaborator exists
///
/// Plugins built against it construct normally; invoking them fails with
/// [`PluginError::Callback`], which the runner records like any plugin failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableCallbacks;

impl UnavailableCallbacks {
    fn error(what: &str) -> PluginError {
        PluginError::Callback(format!("{what} is not available in this environment"))
    }
}

#[async_trait]
impl RiskRulesInvoker for UnavailableCallbacks {
    async fn invoke(&self, _request: RiskRulesRequest) -> Result<Value, PluginError> {
        Err(Self::error("Risk rules evaluation"))
    }
}

#[async_trait]
impl ChildWorkflowInvoker for UnavailableCallbacks {
    async fn invoke(&self, _request: ChildWorkflowRequest) -> Result<(), PluginError> {
        Err(Self::error("Child workflow creation"))
    }
}

#[async_trait]
impl WorkflowTokenInvoker for UnavailableCallbacks {
    async fn invoke(&self, _request: WorkflowTokenRequest) -> Result<Value, PluginError> {
        Err(Self::error("Workflow token issuance"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unavailable_callbacks_fail_as_callback_errors() {
        let result = RiskRulesInvoker::invoke(
            &UnavailableCallbacks,
            RiskRulesRequest {
                context: json!({}),
                rules_source: json!(null),
            },
        )
        .await;
        assert!(matches!(result, Err(PluginError::Callback(_))));
    }
}
