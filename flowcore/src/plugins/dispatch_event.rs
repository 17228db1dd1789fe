//! Dispatch-event plugin: publish a computed event to local subscribers

use crate::context::{apply_transformers, fetch_transformers, Transformer};
use crate::plugins::registry::PluginConstructionError;
use crate::plugins::schema::DispatchEventPluginSchema;
use crate::plugins::PluginError;
use serde_json::Value;

/// Key of the transformed payload that overrides the configured event name
pub const EVENT_NAME_KEY: &str = "eventName";

/// Computes `(event name, payload)` from the context
#[derive(Debug)]
pub struct DispatchEventPlugin {
    /// Unique plugin name
    pub name: String,
    /// States that trigger the plugin
    pub state_names: Vec<String>,
    /// Event sent after subscribers succeed
    pub success_action: Option<String>,
    /// Event sent after a failure
    pub error_action: Option<String>,
    event_name: Option<String>,
    transformers: Vec<Transformer>,
}

impl DispatchEventPlugin {
    /// Build from a schema
    pub fn from_schema(schema: &DispatchEventPluginSchema) -> Result<Self, PluginConstructionError> {
        Ok(Self {
            name: schema.name.clone(),
            state_names: schema.state_names.clone(),
            success_action: schema.success_action.clone(),
            error_action: schema.error_action.clone(),
            event_name: schema.event_name.clone(),
            transformers: fetch_transformers(&schema.transformers)?,
        })
    }

    /// Transform `context` into the event to publish
    ///
    /// A string `eventName` in the transformed payload wins over the configured
    /// name and is removed from the payload.
    pub fn get_plugin_event(&self, context: &Value) -> Result<(String, Value), PluginError> {
        let mut payload = apply_transformers(&self.transformers, context)?;

        let overridden = match &mut payload {
            Value::Object(map) => match map.remove(EVENT_NAME_KEY) {
                Some(Value::String(name)) => Some(name),
                Some(other) => {
                    map.insert(EVENT_NAME_KEY.to_string(), other);
                    None
                }
                None => None,
            },
            _ => None,
        };

        let name = overridden.or_else(|| self.event_name.clone()).ok_or_else(|| {
            PluginError::Execution(format!("Plugin '{}' did not produce an event name", self.name))
        })?;

        Ok((name, payload))
    }
}
