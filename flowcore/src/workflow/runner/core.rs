//! Event processing and the plugin cascade

use super::{RunnerError, RunnerResult, FAILURE_TAG};
use crate::config::Config;
use crate::context::{get_path, type_name};
use crate::plugins::{PluginRegistry, PluginTiming, RegisteredPlugin, StateAction, StatePlugin};
use crate::workflow::{
    notifications, ActionRef, Machine, Snapshot, StateValue, Subscriber, Subscriptions, WorkflowDefinition,
    WorkflowEvent, WorkflowNotification, RULE_EVALUATION_FAILURE,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::instrument::{Instrument, WithSubscriber};
use tracing::{Dispatch, Span};

/// Pending unit of work of one `send_event` or `invoke_plugin` call
///
/// Steps are popped from the top of a stack, so the follow-ups of a step run
/// before its siblings: callback events unwind depth first.
pub(super) enum Step {
    /// An event to process; `callback` marks events emitted by plugins
    Event { event: WorkflowEvent, callback: bool },
    /// A dispatch-event, common or API plugin
    Plugin(RegisteredPlugin),
    /// A blocking state plugin, run inside the status envelope
    Blocking { plugin: StatePlugin, event: WorkflowEvent },
}

/// Drives one workflow instance through events
///
/// A runner owns the current state and context of a single runtime id. Callers
/// serialize events per runner; there is no internal locking.
pub struct WorkflowRunner {
    pub(super) runtime_id: String,
    pub(super) definition: WorkflowDefinition,
    pub(super) machine: Machine,
    pub(super) registry: PluginRegistry,
    pub(super) runtime_config: Value,
    pub(super) state: StateValue,
    pub(super) context: Value,
    pub(super) subscriptions: Subscriptions,
    pub(super) actions: HashMap<String, Arc<dyn StateAction>>,
    pub(super) plugin_actions: HashSet<String>,
    pub(super) config: Config,
    pub(super) dispatch: Option<Dispatch>,
    pub(super) span: Span,
}

impl fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("runtime_id", &self.runtime_id)
            .field("definition", &self.definition.name())
            .field("state", &self.state)
            .field("plugins", &self.registry.len())
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl WorkflowRunner {
    /// Runtime id of the instance
    pub fn runtime_id(&self) -> &str {
        &self.runtime_id
    }

    /// Current state
    pub fn state(&self) -> &StateValue {
        &self.state
    }

    /// Current context
    pub fn context(&self) -> &Value {
        &self.context
    }

    /// Definition the runner was built from, state plugin actions included
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Live plugins
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Register `subscriber` for notifications named `event_name`
    pub fn subscribe(&mut self, event_name: impl Into<String>, subscriber: Arc<dyn Subscriber>) {
        self.subscriptions.subscribe(event_name, subscriber);
    }

    /// State, context and legal next events, without side effects
    pub fn get_snapshot(&self) -> RunnerResult<Snapshot> {
        Ok(self.machine.snapshot(&self.state, &self.context)?)
    }

    /// Replace the context wholesale, bypassing merge semantics
    pub fn override_context(&mut self, context: Value) -> RunnerResult<()> {
        if !context.is_object() {
            return Err(RunnerError::InvalidContext(type_name(&context).to_string()));
        }
        tracing::info!(runtime_id = %self.runtime_id, "Context overridden");
        self.context = context;
        Ok(())
    }

    /// Process `event` and the whole plugin cascade it triggers
    ///
    /// Fails when the event is illegal in the current state; plugin failures
    /// are recorded in the context instead.
    pub async fn send_event(&mut self, event: WorkflowEvent) -> RunnerResult<()> {
        self.run(vec![Step::Event { event, callback: false }]).await
    }

    /// Invoke a plugin by name regardless of the current state
    pub async fn invoke_plugin(&mut self, name: &str) -> RunnerResult<()> {
        let plugin = self
            .registry
            .find(name)
            .ok_or_else(|| RunnerError::PluginNotFound(name.to_string()))?;
        tracing::info!(runtime_id = %self.runtime_id, plugin = name, "Manually invoking plugin");
        self.run(vec![Step::Plugin(plugin)]).await
    }

    async fn run(&mut self, steps: Vec<Step>) -> RunnerResult<()> {
        let span = self.span.clone();
        match self.dispatch.clone() {
            Some(dispatch) => self.run_steps(steps).instrument(span).with_subscriber(dispatch).await,
            None => self.run_steps(steps).instrument(span).await,
        }
    }

    async fn run_steps(&mut self, mut stack: Vec<Step>) -> RunnerResult<()> {
        stack.reverse();
        let limit = self.config.max_cascade_events;
        let mut callbacks = 0;

        while let Some(step) = stack.pop() {
            match step {
                Step::Event { event, callback } => {
                    if callback {
                        callbacks += 1;
                        if callbacks > limit {
                            tracing::error!(limit, event = %event.event_type, "Callback cascade limit exceeded");
                            return Err(RunnerError::CascadeLimitExceeded { limit });
                        }
                    }
                    let follow_ups = self.process_event(event).await?;
                    stack.extend(follow_ups.into_iter().rev());
                }
                Step::Plugin(plugin) => {
                    if let Some(action) = self.invoke_registered(&plugin).await {
                        tracing::debug!(callback = %action, "Queueing callback event");
                        stack.push(Step::Event {
                            event: WorkflowEvent::new(action),
                            callback: true,
                        });
                    }
                }
                Step::Blocking { plugin, event } => {
                    self.run_state_action(&plugin.name, plugin.action.clone(), &event).await;
                }
            }
        }
        Ok(())
    }

    /// One macrostep: returns the plugin steps the new state calls for
    async fn process_event(&mut self, event: WorkflowEvent) -> RunnerResult<Vec<Step>> {
        tracing::info!(event = %event.event_type, state = %self.state, "Received event");
        self.machine.ensure_legal(&self.state, &event)?;

        if !event.is_built_in() {
            let pre = self.registry.blocking(&self.state, PluginTiming::Pre);
            if !pre.is_empty() {
                tracing::warn!(
                    state = %self.state,
                    plugins = pre.len(),
                    "Blocking pre plugins run before every event and are deprecated"
                );
            }
            for plugin in pre {
                self.run_state_action(&plugin.name, plugin.action.clone(), &event).await;
            }
        }

        let outcome = self.machine.transition(&self.state, &self.context, &event)?;

        for failure in &outcome.guard_failures {
            let notification = WorkflowNotification::new(RULE_EVALUATION_FAILURE)
                .state(self.state.clone())
                .payload(Some(failure.options.clone()));
            self.notify(notifications::EVALUATION_ERROR, notification).await;
        }

        let previous = std::mem::replace(&mut self.state, outcome.value);
        self.context = outcome.context;
        self.execute_actions(&outcome.actions, &event).await;

        if outcome.changed || outcome.reentered {
            tracing::info!(from = %previous, to = %self.state, event = %event.event_type, "State transitioned");
            if outcome.done {
                tracing::info!(state = %self.state, "Workflow reached a final state");
            }
            if outcome.tags.iter().any(|tag| tag == FAILURE_TAG) {
                let correlation_id = get_path(&self.context, "entity.id").map(Value::to_string);
                tracing::warn!(state = %self.state, correlation_id = ?correlation_id, "Workflow reached a failure state");
            }
            let notification = WorkflowNotification::new(event.event_type.clone())
                .state(self.state.clone())
                .payload(event.payload.clone())
                .context(self.context.clone());
            self.notify(notifications::STATE_UPDATE, notification).await;
        }

        if self.config.debug_mode {
            tracing::debug!(context = %self.context, "Context after event");
        }

        if event.is_built_in() || !(outcome.changed || outcome.reentered) {
            tracing::debug!(event = %event.event_type, state = %self.state, "No transition; skipping plugins");
            return Ok(Vec::new());
        }

        let plugins = self.registry.for_state(&self.state);
        let mut steps = Vec::new();
        steps.extend(
            plugins
                .dispatch_event
                .into_iter()
                .map(|plugin| Step::Plugin(RegisteredPlugin::DispatchEvent(plugin))),
        );
        steps.extend(
            plugins
                .common
                .into_iter()
                .map(|plugin| Step::Plugin(RegisteredPlugin::Common(plugin))),
        );
        steps.extend(plugins.api.into_iter().map(|plugin| Step::Plugin(RegisteredPlugin::Api(plugin))));
        steps.extend(plugins.post_blocking.into_iter().map(|plugin| Step::Blocking {
            plugin,
            event: event.clone(),
        }));
        Ok(steps)
    }

    /// Run chart actions in order; failures never abort the event
    async fn execute_actions(&self, actions: &[ActionRef], event: &WorkflowEvent) {
        for action_ref in actions {
            let name = action_ref.name();
            let Some(action) = self.actions.get(name).cloned() else {
                tracing::warn!(action = name, "Unknown action; skipping");
                continue;
            };
            if self.plugin_actions.contains(name) {
                self.run_state_action(name, action, event).await;
            } else if let Err(error) = action.execute(self.action_input(event)).await {
                tracing::warn!(action = name, %error, "Action failed");
            }
        }
    }
}
