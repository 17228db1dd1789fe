//! Serializable plugin schemas, as stored alongside a workflow definition

use crate::context::TransformerSchema;
use crate::plugins::transport::HttpMethod;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Plugin schema arrays, grouped by family
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginExtensions {
    /// HTTP plugins
    #[serde(default)]
    pub api_plugins: Vec<HttpPluginSchema>,
    /// Iterative, transformer, risk-rules and UI-definition plugins
    #[serde(default)]
    pub common_plugins: Vec<CommonPluginSchema>,
    /// Child workflow plugins
    #[serde(default)]
    pub child_workflow_plugins: Vec<ChildWorkflowPluginSchema>,
    /// Dispatch-event plugins
    #[serde(default)]
    pub dispatch_event_plugins: Vec<DispatchEventPluginSchema>,
}

impl PluginExtensions {
    /// Total number of declared plugins
    pub fn len(&self) -> usize {
        self.api_plugins.len()
            + self.common_plugins.len()
            + self.child_workflow_plugins.len()
            + self.dispatch_event_plugins.len()
    }

    /// Whether no plugin is declared
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A transformer chain plus an optional JSON schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatableTransformerSchema {
    /// Transformer chain
    #[serde(default)]
    pub transform: Vec<TransformerSchema>,
    /// JSON schema checked after transformation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// HTTP plugin schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpPluginSchema {
    /// Unique plugin name
    pub name: String,
    /// Explicit kind; classification falls back on callbacks when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_kind: Option<String>,
    /// Vendor forwarded by vendor kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Human readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// States that trigger the plugin
    #[serde(default)]
    pub state_names: Vec<String>,
    /// URL template
    pub url: String,
    /// HTTP method, POST when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    /// Header templates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Request shaping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<ValidatableTransformerSchema>,
    /// Response shaping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ValidatableTransformerSchema>,
    /// Event sent after success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_action: Option<String>,
    /// Event sent after failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_action: Option<String>,
    /// Dotted context path receiving the response body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_response_destination: Option<String>,
}

/// Common plugin schema; the fields used depend on `plugin_kind`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonPluginSchema {
    /// Unique plugin name
    pub name: String,
    /// `iterative`, `transformer`, `riskRules` or `attach-ui-definition`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_kind: Option<String>,
    /// States that trigger the plugin
    #[serde(default)]
    pub state_names: Vec<String>,
    /// Iterative: the API or child-workflow plugin invoked per item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_plugin_name: Option<String>,
    /// Iterative: transformers producing the item list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iterate_on: Vec<TransformerSchema>,
    /// Transformer: the chain applied to the context
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformers: Vec<TransformerSchema>,
    /// Risk rules: opaque rules source handed to the callback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_source: Option<Value>,
    /// UI definition: definition id to issue a token for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_definition_id: Option<String>,
    /// UI definition: token lifetime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_in_minutes: Option<u64>,
    /// Event sent after success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_action: Option<String>,
    /// Event sent after failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_action: Option<String>,
    /// Dotted context path receiving the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_response_destination: Option<String>,
}

/// Child workflow plugin schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildWorkflowPluginSchema {
    /// Unique plugin name
    pub name: String,
    /// States that trigger the plugin
    #[serde(default)]
    pub state_names: Vec<String>,
    /// Definition of the child workflow
    pub definition_id: String,
    /// Event sent to the child right after creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_event: Option<String>,
    /// Transformers producing the child context
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformers: Vec<TransformerSchema>,
}

/// Dispatch-event plugin schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEventPluginSchema {
    /// Unique plugin name
    pub name: String,
    /// States that trigger the plugin
    #[serde(default)]
    pub state_names: Vec<String>,
    /// Notification name, unless the transformed payload carries `eventName`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    /// Transformers producing the notification payload
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformers: Vec<TransformerSchema>,
    /// Event sent after subscribers succeed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_action: Option<String>,
    /// Event sent after a subscriber fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_action: Option<String>,
}
