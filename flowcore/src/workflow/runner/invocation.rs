//! Plugin invocation protocols and the state action status envelope

use super::core::WorkflowRunner;
use super::PLUGIN_STATUS_ERROR;
use crate::context::{
    deep_merge, merge_to_context, object_entry, shallow_merge, PLUGINS_OUTPUT_KEY, WORKFLOW_RUNTIME_CONFIG_KEY,
    WORKFLOW_RUNTIME_ID_KEY,
};
use crate::plugins::{CommonPlugin, DispatchEventPlugin, HttpPlugin, RegisteredPlugin, StateAction, StateActionInput};
use crate::workflow::{
    notifications, ActionStatus, WorkflowEvent, WorkflowNotification, ERROR, HTTP_ERROR, STATE_ACTION_STATUS,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;

impl WorkflowRunner {
    /// Invoke a plugin and return the callback event it asks for
    pub(super) async fn invoke_registered(&mut self, plugin: &RegisteredPlugin) -> Option<String> {
        match plugin {
            RegisteredPlugin::DispatchEvent(plugin) => self.invoke_dispatch_event(plugin).await,
            RegisteredPlugin::Common(plugin) => self.invoke_common(plugin).await,
            RegisteredPlugin::Api(plugin) => self.invoke_api(plugin).await,
        }
    }

    async fn invoke_dispatch_event(&self, plugin: &DispatchEventPlugin) -> Option<String> {
        tracing::info!(plugin = %plugin.name, "Dispatching plugin event");
        let (event_name, payload) = match plugin.get_plugin_event(&self.context) {
            Ok(event) => event,
            Err(error) => {
                tracing::error!(plugin = %plugin.name, %error, "Failed to compute plugin event");
                return plugin.error_action.clone();
            }
        };

        let notification = WorkflowNotification::new(event_name.clone())
            .state(self.state.clone())
            .payload(Some(payload));
        match self.subscriptions.notify(&event_name, &notification).await {
            Ok(()) => plugin.success_action.clone(),
            Err(error) => {
                tracing::error!(plugin = %plugin.name, event = %event_name, %error, "Dispatching plugin event failed");
                plugin.error_action.clone()
            }
        }
    }

    async fn invoke_common(&mut self, plugin: &CommonPlugin) -> Option<String> {
        let name = plugin.name().to_string();
        tracing::info!(plugin = %name, "Invoking common plugin");
        let output = plugin.invoke(&self.plugin_input()).await;

        if let Some(error) = &output.error {
            tracing::error!(plugin = %name, %error, "Common plugin failed");
            *self.plugin_output(&name) = json!({"error": error.to_string()});
        }

        if let Some(response) = output.response.filter(|response| !response.is_null()) {
            match plugin.persist_response_destination() {
                Some(destination) => merge_to_context(&mut self.context, response, destination),
                None => *self.plugin_output(&name) = response,
            }
        }

        output.callback_action
    }

    async fn invoke_api(&mut self, plugin: &HttpPlugin) -> Option<String> {
        tracing::info!(plugin = %plugin.name, kind = %plugin.kind, "Invoking API plugin");
        let output = plugin.invoke(&self.plugin_input()).await;

        if let Some(body) = output.response_body.filter(|body| !body.is_null()) {
            match &plugin.persist_response_destination {
                Some(destination) => merge_to_context(&mut self.context, body, destination),
                None => self.merge_plugin_output(&plugin.name, body),
            }
        }

        if let Some(error) = output.error {
            tracing::error!(plugin = %plugin.name, %error, "API plugin failed");
            let entry = json!({
                "name": plugin.name,
                "error": error.to_string(),
                "status": PLUGIN_STATUS_ERROR,
            });
            self.merge_plugin_output(&plugin.name, entry);
        }

        if plugin.has_callback_actions() {
            output.callback_action
        } else {
            None
        }
    }

    /// Run a state action wrapped in `PENDING` then `SUCCESS` or `ERROR`
    /// status notifications; failures are reported, never returned
    pub(super) async fn run_state_action(&self, name: &str, action: Arc<dyn StateAction>, event: &WorkflowEvent) {
        let status = |status: ActionStatus| {
            WorkflowNotification::new(STATE_ACTION_STATUS)
                .state(self.state.clone())
                .payload(Some(json!({"status": status, "action": name})))
        };

        self.notify(notifications::STATUS_UPDATE, status(ActionStatus::Pending)).await;
        match action.execute(self.action_input(event)).await {
            Ok(()) => {
                self.notify(notifications::STATUS_UPDATE, status(ActionStatus::Success)).await;
            }
            Err(error) => {
                tracing::error!(action = name, %error, "State action failed");
                self.notify(
                    notifications::STATUS_UPDATE,
                    status(ActionStatus::Error).error(error.to_string()),
                )
                .await;
                let error_type = if error.is_http() { HTTP_ERROR } else { ERROR };
                let notification = WorkflowNotification::new(error_type)
                    .state(self.state.clone())
                    .error(error.to_string());
                self.notify(notifications::STATUS_UPDATE, notification).await;
            }
        }
    }

    /// Input of chart actions and state plugins
    pub(super) fn action_input(&self, event: &WorkflowEvent) -> StateActionInput {
        StateActionInput {
            workflow_id: self.runtime_id.clone(),
            context: self.context.clone(),
            event: event.clone(),
            state: self.state.clone(),
        }
    }

    /// Deliver a notification; subscriber failures are logged only
    pub(super) async fn notify(&self, event_name: &str, notification: WorkflowNotification) {
        if let Err(error) = self.subscriptions.notify(event_name, &notification).await {
            tracing::warn!(notification = event_name, %error, "Subscriber failed");
        }
    }

    /// Context plus the runtime config and id
    fn plugin_input(&self) -> Value {
        let mut runtime = Map::new();
        runtime.insert(WORKFLOW_RUNTIME_CONFIG_KEY.to_string(), self.runtime_config.clone());
        runtime.insert(WORKFLOW_RUNTIME_ID_KEY.to_string(), Value::String(self.runtime_id.clone()));
        shallow_merge(&self.context, Some(&Value::Object(runtime)))
    }

    fn plugin_output(&mut self, name: &str) -> &mut Value {
        object_entry(object_entry(&mut self.context, PLUGINS_OUTPUT_KEY), name)
    }

    fn merge_plugin_output(&mut self, name: &str, value: Value) {
        let slot = self.plugin_output(name);
        *slot = if value.is_object() { deep_merge(&value, slot) } else { value };
    }
}
