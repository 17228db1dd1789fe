//! Child workflow plugin

use crate::context::{apply_transformers, fetch_transformers, Transformer};
use crate::plugins::callbacks::{ChildInitOptions, ChildWorkflowInvoker, ChildWorkflowRequest};
use crate::plugins::registry::PluginConstructionError;
use crate::plugins::schema::ChildWorkflowPluginSchema;
use crate::plugins::PluginError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Spawns a child workflow whose context is derived from the parent's
pub struct ChildWorkflowPlugin {
    /// Unique plugin name
    pub name: String,
    /// States that trigger the plugin
    pub state_names: Vec<String>,
    /// Definition of the child
    pub definition_id: String,
    /// Event sent to the child after creation
    pub init_event: Option<String>,
    transformers: Vec<Transformer>,
    parent_runtime_id: String,
    parent_runtime_config: Value,
    invoker: Arc<dyn ChildWorkflowInvoker>,
}

impl fmt::Debug for ChildWorkflowPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildWorkflowPlugin")
            .field("name", &self.name)
            .field("definition_id", &self.definition_id)
            .field("init_event", &self.init_event)
            .finish_non_exhaustive()
    }
}

impl ChildWorkflowPlugin {
    /// Build from a schema, bound to the parent runtime
    pub fn from_schema(
        schema: &ChildWorkflowPluginSchema,
        parent_runtime_id: &str,
        parent_runtime_config: &Value,
        invoker: Arc<dyn ChildWorkflowInvoker>,
    ) -> Result<Self, PluginConstructionError> {
        Ok(Self {
            name: schema.name.clone(),
            state_names: schema.state_names.clone(),
            definition_id: schema.definition_id.clone(),
            init_event: schema.init_event.clone(),
            transformers: fetch_transformers(&schema.transformers)?,
            parent_runtime_id: parent_runtime_id.to_string(),
            parent_runtime_config: parent_runtime_config.clone(),
            invoker,
        })
    }

    /// Transform `input` into the child context and create the child
    pub async fn invoke(&self, input: &Value) -> Result<(), PluginError> {
        let context = apply_transformers(&self.transformers, input)?;
        tracing::info!(
            plugin = %self.name,
            definition_id = %self.definition_id,
            "Creating child workflow"
        );

        self.invoker
            .invoke(ChildWorkflowRequest {
                parent_workflow_runtime_id: self.parent_runtime_id.clone(),
                parent_workflow_runtime_config: self.parent_runtime_config.clone(),
                definition_id: self.definition_id.clone(),
                init_options: ChildInitOptions {
                    event: self.init_event.clone(),
                    context,
                },
            })
            .await
    }
}
