//! Common plugins: iterative, transformer, risk rules and UI token issuance

use crate::context::{apply_transformers, shallow_merge, Transformer};
use crate::plugins::callbacks::{RiskRulesInvoker, RiskRulesRequest, WorkflowTokenInvoker, WorkflowTokenRequest};
use crate::plugins::child_workflow::ChildWorkflowPlugin;
use crate::plugins::http::HttpPlugin;
use crate::plugins::PluginError;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Result of a common plugin invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommonPluginOutput {
    /// Event to send back into the runner
    pub callback_action: Option<String>,
    /// Failure, recorded under `pluginsOutput.<name>.error`
    pub error: Option<PluginError>,
    /// Value merged into the context
    pub response: Option<Value>,
}

impl CommonPluginOutput {
    fn success(callback_action: Option<String>, response: Option<Value>) -> Self {
        Self {
            callback_action,
            error: None,
            response,
        }
    }

    fn failure(callback_action: Option<String>, error: PluginError) -> Self {
        Self {
            callback_action,
            error: Some(error),
            response: None,
        }
    }
}

/// A plugin an iterative plugin can call once per item
#[derive(Debug, Clone)]
pub enum ActionPlugin {
    /// An HTTP plugin
    Http(Arc<HttpPlugin>),
    /// A child workflow plugin
    ChildWorkflow(Arc<ChildWorkflowPlugin>),
}

impl ActionPlugin {
    /// Name of the wrapped plugin
    pub fn name(&self) -> &str {
        match self {
            ActionPlugin::Http(plugin) => &plugin.name,
            ActionPlugin::ChildWorkflow(plugin) => &plugin.name,
        }
    }

    async fn invoke(&self, input: &Value) -> Result<(), PluginError> {
        match self {
            ActionPlugin::Http(plugin) => match plugin.invoke(input).await.error {
                Some(error) => Err(error),
                None => Ok(()),
            },
            ActionPlugin::ChildWorkflow(plugin) => plugin.invoke(input).await,
        }
    }
}

/// Invokes an action plugin once per item of a computed list
#[derive(Debug)]
pub struct IterativePlugin {
    /// Unique plugin name
    pub name: String,
    /// States that trigger the plugin
    pub state_names: Vec<String>,
    /// Dotted context path receiving the response
    pub persist_response_destination: Option<String>,
    /// Event sent after every item succeeded
    pub success_action: Option<String>,
    /// Event sent after the first failing item
    pub error_action: Option<String>,
    pub(crate) iterate_on: Vec<Transformer>,
    pub(crate) action: ActionPlugin,
}

impl IterativePlugin {
    /// Run the action plugin for each item, stopping at the first failure
    ///
    /// Object items are merged over the plugin input; other items are passed
    /// under the `item` key.
    pub async fn invoke(&self, input: &Value) -> CommonPluginOutput {
        let items = match apply_transformers(&self.iterate_on, input) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Null) => Vec::new(),
            Ok(other) => vec![other],
            Err(error) => return CommonPluginOutput::failure(self.error_action.clone(), error.into()),
        };

        tracing::debug!(plugin = %self.name, items = items.len(), action = self.action.name(), "Iterating");
        for item in &items {
            let item_input = match item {
                Value::Object(_) => shallow_merge(input, Some(item)),
                other => shallow_merge(input, Some(&json!({ "item": other }))),
            };
            if let Err(error) = self.action.invoke(&item_input).await {
                return CommonPluginOutput::failure(self.error_action.clone(), error);
            }
        }

        CommonPluginOutput::success(self.success_action.clone(), None)
    }
}

/// Applies a transformer chain to the context and persists the result
#[derive(Debug)]
pub struct TransformerPlugin {
    /// Unique plugin name
    pub name: String,
    /// States that trigger the plugin
    pub state_names: Vec<String>,
    /// Dotted context path receiving the response
    pub persist_response_destination: Option<String>,
    pub(crate) transformers: Vec<Transformer>,
}

impl TransformerPlugin {
    /// Transform the input; the result becomes the plugin response
    pub async fn invoke(&self, input: &Value) -> CommonPluginOutput {
        match apply_transformers(&self.transformers, input) {
            Ok(response) => CommonPluginOutput::success(None, Some(response)),
            Err(error) => CommonPluginOutput::failure(None, error.into()),
        }
    }
}

/// Evaluates risk rules through the injected invoker
pub struct RiskRulesPlugin {
    /// Unique plugin name
    pub name: String,
    /// States that trigger the plugin
    pub state_names: Vec<String>,
    /// Dotted context path receiving the response
    pub persist_response_destination: Option<String>,
    /// Event sent after success
    pub success_action: Option<String>,
    /// Event sent after failure
    pub error_action: Option<String>,
    pub(crate) rules_source: Value,
    pub(crate) invoker: Arc<dyn RiskRulesInvoker>,
}

impl fmt::Debug for RiskRulesPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskRulesPlugin")
            .field("name", &self.name)
            .field("rules_source", &self.rules_source)
            .finish_non_exhaustive()
    }
}

impl RiskRulesPlugin {
    /// Evaluate the rules; their results become the plugin response
    pub async fn invoke(&self, input: &Value) -> CommonPluginOutput {
        let request = RiskRulesRequest {
            context: input.clone(),
            rules_source: self.rules_source.clone(),
        };
        match self.invoker.invoke(request).await {
            Ok(results) => CommonPluginOutput::success(self.success_action.clone(), Some(results)),
            Err(error) => CommonPluginOutput::failure(self.error_action.clone(), error),
        }
    }
}

/// Issues a UI access token through the injected invoker
pub struct WorkflowTokenPlugin {
    /// Unique plugin name
    pub name: String,
    /// States that trigger the plugin
    pub state_names: Vec<String>,
    /// Dotted context path receiving the response
    pub persist_response_destination: Option<String>,
    /// UI definition the token grants access to
    pub ui_definition_id: String,
    /// Token lifetime
    pub expire_in_minutes: Option<u64>,
    /// Event sent after success
    pub success_action: Option<String>,
    /// Event sent after failure
    pub error_action: Option<String>,
    pub(crate) invoker: Arc<dyn WorkflowTokenInvoker>,
}

impl fmt::Debug for WorkflowTokenPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowTokenPlugin")
            .field("name", &self.name)
            .field("ui_definition_id", &self.ui_definition_id)
            .field("expire_in_minutes", &self.expire_in_minutes)
            .finish_non_exhaustive()
    }
}

impl WorkflowTokenPlugin {
    /// Issue the token; the returned value becomes the plugin response
    pub async fn invoke(&self, input: &Value) -> CommonPluginOutput {
        let request = WorkflowTokenRequest {
            ui_definition_id: self.ui_definition_id.clone(),
            expire_in_minutes: self.expire_in_minutes,
            context: input.clone(),
        };
        match self.invoker.invoke(request).await {
            Ok(token) => CommonPluginOutput::success(self.success_action.clone(), Some(token)),
            Err(error) => CommonPluginOutput::failure(self.error_action.clone(), error),
        }
    }
}

/// The plugins invoked in the common family
#[derive(Debug, Clone)]
pub enum CommonPlugin {
    /// Per-item action plugin calls
    Iterative(Arc<IterativePlugin>),
    /// Pure context transformation
    Transformer(Arc<TransformerPlugin>),
    /// Risk rule evaluation
    RiskRules(Arc<RiskRulesPlugin>),
    /// UI token issuance
    WorkflowToken(Arc<WorkflowTokenPlugin>),
    /// Child workflow creation
    ChildWorkflow(Arc<ChildWorkflowPlugin>),
}

impl CommonPlugin {
    /// Unique plugin name
    pub fn name(&self) -> &str {
        match self {
            CommonPlugin::Iterative(p) => &p.name,
            CommonPlugin::Transformer(p) => &p.name,
            CommonPlugin::RiskRules(p) => &p.name,
            CommonPlugin::WorkflowToken(p) => &p.name,
            CommonPlugin::ChildWorkflow(p) => &p.name,
        }
    }

    /// States that trigger the plugin
    pub fn state_names(&self) -> &[String] {
        match self {
            CommonPlugin::Iterative(p) => &p.state_names,
            CommonPlugin::Transformer(p) => &p.state_names,
            CommonPlugin::RiskRules(p) => &p.state_names,
            CommonPlugin::WorkflowToken(p) => &p.state_names,
            CommonPlugin::ChildWorkflow(p) => &p.state_names,
        }
    }

    /// Dotted context path receiving the response
    pub fn persist_response_destination(&self) -> Option<&str> {
        match self {
            CommonPlugin::Iterative(p) => p.persist_response_destination.as_deref(),
            CommonPlugin::Transformer(p) => p.persist_response_destination.as_deref(),
            CommonPlugin::RiskRules(p) => p.persist_response_destination.as_deref(),
            CommonPlugin::WorkflowToken(p) => p.persist_response_destination.as_deref(),
            CommonPlugin::ChildWorkflow(_) => None,
        }
    }

    /// Invoke the plugin with `input` (context plus runtime config and id)
    pub async fn invoke(&self, input: &Value) -> CommonPluginOutput {
        match self {
            CommonPlugin::Iterative(p) => p.invoke(input).await,
            CommonPlugin::Transformer(p) => p.invoke(input).await,
            CommonPlugin::RiskRules(p) => p.invoke(input).await,
            CommonPlugin::WorkflowToken(p) => p.invoke(input).await,
            CommonPlugin::ChildWorkflow(p) => match p.invoke(input).await {
                Ok(()) => CommonPluginOutput::default(),
                Err(error) => CommonPluginOutput::failure(None, error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{fetch_transformers, TransformerSchema};
    use crate::plugins::callbacks::{ChildWorkflowInvoker, ChildWorkflowRequest};
    use crate::plugins::schema::ChildWorkflowPluginSchema;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn jmespath(mapping: &str) -> Vec<Transformer> {
        fetch_transformers(&[TransformerSchema {
            transformer: "jmespath".into(),
            mapping: json!(mapping),
        }])
        .unwrap()
    }

    #[derive(Default)]
    struct Children {
        contexts: Mutex<Vec<Value>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl ChildWorkflowInvoker for Children {
        async fn invoke(&self, request: ChildWorkflowRequest) -> Result<(), PluginError> {
            let context = request.init_options.context;
            if let Some(name) = self.fail_on {
                if context["name"] == json!(name) {
                    return Err(PluginError::Callback(format!("cannot spawn {name}")));
                }
            }
            self.contexts.lock().unwrap().push(context);
            Ok(())
        }
    }

    fn child_action(invoker: Arc<Children>) -> ActionPlugin {
        let schema: ChildWorkflowPluginSchema = serde_json::from_value(json!({
            "name": "spawn",
            "definitionId": "child"
        }))
        .unwrap();
        ActionPlugin::ChildWorkflow(Arc::new(
            ChildWorkflowPlugin::from_schema(&schema, "parent", &Value::Null, invoker).unwrap(),
        ))
    }

    fn iterative(invoker: Arc<Children>) -> IterativePlugin {
        IterativePlugin {
            name: "each_ubo".into(),
            state_names: vec!["collect".into()],
            persist_response_destination: None,
            success_action: Some("ALL_SPAWNED".into()),
            error_action: Some("SPAWN_FAILED".into()),
            iterate_on: jmespath("ubos"),
            action: child_action(invoker),
        }
    }

    #[tokio::test]
    async fn test_iterative_invokes_action_per_item() {
        let invoker = Arc::new(Children::default());
        let plugin = iterative(invoker.clone());

        let output = plugin
            .invoke(&json!({"ubos": [{"name": "a"}, {"name": "b"}], "tenant": "t"}))
            .await;

        assert_eq!(output.callback_action.as_deref(), Some("ALL_SPAWNED"));
        assert_eq!(output.error, None);
        let contexts = invoker.contexts.lock().unwrap();
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[1]["name"], json!("b"));
        assert_eq!(contexts[1]["tenant"], json!("t"));
    }

    #[tokio::test]
    async fn test_iterative_stops_at_first_failure() {
        let invoker = Arc::new(Children {
            fail_on: Some("a"),
            ..Default::default()
        });
        let plugin = iterative(invoker.clone());

        let output = plugin.invoke(&json!({"ubos": [{"name": "a"}, {"name": "b"}]})).await;

        assert_eq!(output.callback_action.as_deref(), Some("SPAWN_FAILED"));
        assert!(matches!(output.error, Some(PluginError::Callback(_))));
        assert!(invoker.contexts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scalar_items_are_passed_under_item_key() {
        let invoker = Arc::new(Children::default());
        let mut plugin = iterative(invoker.clone());
        plugin.iterate_on = jmespath("ids");

        plugin.invoke(&json!({"ids": [7]})).await;

        assert_eq!(invoker.contexts.lock().unwrap()[0]["item"], json!(7));
    }

    #[tokio::test]
    async fn test_transformer_plugin_returns_response() {
        let plugin = TransformerPlugin {
            name: "shape".into(),
            state_names: vec![],
            persist_response_destination: None,
            transformers: jmespath("{names: people[].name}"),
        };
        let output = plugin.invoke(&json!({"people": [{"name": "a"}, {"name": "b"}]})).await;
        assert_eq!(output.response, Some(json!({"names": ["a", "b"]})));
        assert_eq!(output.callback_action, None);
    }

    struct Rules;

    #[async_trait]
    impl RiskRulesInvoker for Rules {
        async fn invoke(&self, request: RiskRulesRequest) -> Result<Value, PluginError> {
            match request.context["entity"]["country"].as_str() {
                Some(country) => Ok(json!([{"rule": "country", "result": country == "IR"}])),
                None => Err(PluginError::Callback("missing country".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_risk_rules_results_and_errors() {
        let plugin = CommonPlugin::RiskRules(Arc::new(RiskRulesPlugin {
            name: "rules".into(),
            state_names: vec![],
            persist_response_destination: None,
            success_action: None,
            error_action: Some("RULES_FAILED".into()),
            rules_source: json!({"source": "inline"}),
            invoker: Arc::new(Rules),
        }));

        let ok = plugin.invoke(&json!({"entity": {"country": "IR"}})).await;
        assert_eq!(ok.response, Some(json!([{"rule": "country", "result": true}])));

        let failed = plugin.invoke(&json!({})).await;
        assert_eq!(failed.callback_action.as_deref(), Some("RULES_FAILED"));
        assert!(failed.error.is_some());
        assert_eq!(plugin.name(), "rules");
    }
}
