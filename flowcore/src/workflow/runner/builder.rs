//! Construction of [`WorkflowRunner`]s

use super::core::WorkflowRunner;
use super::{RunnerError, RunnerResult};
use crate::config::Config;
use crate::context::type_name;
use crate::plugins::{
    ChildWorkflowInvoker, HttpTransport, PluginConstructionError, PluginExtensions, PluginRegistry, PluginTiming,
    RegistryContext, ReqwestTransport, RiskRulesInvoker, StateAction, StatePlugin, WorkflowTokenInvoker,
};
use crate::secrets::SecretsManager;
use crate::workflow::{ActionRef, Machine, StateValue, Subscriber, Subscriptions, WorkflowDefinition};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::Dispatch;

/// Builder for [`WorkflowRunner`]
///
/// Only the runtime id and the definition are required. Everything else falls
/// back to the definition's seed data, the global [`Config`] and the default
/// HTTP transport.
pub struct WorkflowRunnerBuilder {
    runtime_id: String,
    definition: WorkflowDefinition,
    config: Option<Config>,
    runtime_config: Value,
    extensions: PluginExtensions,
    state_plugins: Vec<StatePlugin>,
    actions: Vec<(String, Arc<dyn StateAction>)>,
    machine_context: Option<Value>,
    state: Option<StateValue>,
    secrets_manager: Option<Arc<dyn SecretsManager>>,
    transport: Option<Arc<dyn HttpTransport>>,
    risk_rules: Option<Arc<dyn RiskRulesInvoker>>,
    child_workflow: Option<Arc<dyn ChildWorkflowInvoker>>,
    workflow_token: Option<Arc<dyn WorkflowTokenInvoker>>,
    logger: Option<Dispatch>,
    subscriptions: Subscriptions,
}

impl WorkflowRunnerBuilder {
    /// Start a runner for `definition` under `runtime_id`
    pub fn new(runtime_id: impl Into<String>, definition: WorkflowDefinition) -> Self {
        Self {
            runtime_id: runtime_id.into(),
            definition,
            config: None,
            runtime_config: Value::Object(Map::new()),
            extensions: PluginExtensions::default(),
            state_plugins: Vec::new(),
            actions: Vec::new(),
            machine_context: None,
            state: None,
            secrets_manager: None,
            transport: None,
            risk_rules: None,
            child_workflow: None,
            workflow_token: None,
            logger: None,
            subscriptions: Subscriptions::default(),
        }
    }

    /// Engine configuration; defaults to [`Config::global`]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Opaque config handed to plugins as `workflowRuntimeConfig`
    pub fn runtime_config(mut self, runtime_config: Value) -> Self {
        self.runtime_config = runtime_config;
        self
    }

    /// Plugin schemas
    pub fn extensions(mut self, extensions: PluginExtensions) -> Self {
        self.extensions = extensions;
        self
    }

    /// Add a state plugin
    pub fn state_plugin(mut self, plugin: StatePlugin) -> Self {
        self.state_plugins.push(plugin);
        self
    }

    /// Make a named action available to the chart
    pub fn action(mut self, name: impl Into<String>, action: Arc<dyn StateAction>) -> Self {
        self.actions.push((name.into(), action));
        self
    }

    /// Resume with this context
    pub fn machine_context(mut self, context: Value) -> Self {
        self.machine_context = Some(context);
        self
    }

    /// Resume in this state
    pub fn state(mut self, state: StateValue) -> Self {
        self.state = Some(state);
        self
    }

    /// Source of HTTP plugin secrets
    pub fn secrets_manager(mut self, secrets_manager: Arc<dyn SecretsManager>) -> Self {
        self.secrets_manager = Some(secrets_manager);
        self
    }

    /// Network layer of HTTP plugins
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Callback used by `riskRules` plugins
    pub fn risk_rules_invoker(mut self, invoker: Arc<dyn RiskRulesInvoker>) -> Self {
        self.risk_rules = Some(invoker);
        self
    }

    /// Callback used by `child-workflow` plugins
    pub fn child_workflow_invoker(mut self, invoker: Arc<dyn ChildWorkflowInvoker>) -> Self {
        self.child_workflow = Some(invoker);
        self
    }

    /// Callback used by `attach-ui-definition` plugins
    pub fn workflow_token_invoker(mut self, invoker: Arc<dyn WorkflowTokenInvoker>) -> Self {
        self.workflow_token = Some(invoker);
        self
    }

    /// Subscriber receiving every log event of this runner
    pub fn logger(mut self, dispatch: Dispatch) -> Self {
        self.logger = Some(dispatch);
        self
    }

    /// Register a subscriber before the first event
    pub fn subscribe(mut self, event_name: impl Into<String>, subscriber: Arc<dyn Subscriber>) -> Self {
        self.subscriptions.subscribe(event_name, subscriber);
        self
    }

    /// Compile the chart, build every plugin and resolve the starting point
    pub fn build(self) -> RunnerResult<WorkflowRunner> {
        let config = self.config.unwrap_or_else(|| Config::global().clone());
        let mut definition = self.definition;
        inject_state_plugin_actions(&mut definition, &self.state_plugins)?;

        let machine = Machine::new(&definition, config.max_eventless_steps)?;
        let state = match self.state {
            Some(state) => machine.validate_state(&state)?,
            None => machine.initial_value(),
        };
        let context = resume_context(self.machine_context, definition.context.as_ref())?;

        let secrets = match &self.secrets_manager {
            Some(manager) => manager.get_all()?,
            None => HashMap::new(),
        };
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new(config.http_timeout())
                    .map_err(|e| PluginConstructionError::Transport(e.to_string()))?,
            ),
        };

        let non_blocking: Vec<(String, Arc<dyn StateAction>)> = self
            .state_plugins
            .iter()
            .filter(|plugin| !plugin.is_blocking)
            .map(|plugin| (plugin.name.clone(), plugin.action.clone()))
            .collect();

        let registry = PluginRegistry::build(
            &self.extensions,
            self.state_plugins,
            &RegistryContext {
                runtime_id: &self.runtime_id,
                runtime_config: &self.runtime_config,
                machine: &machine,
                secrets: Arc::new(secrets),
                transport,
                risk_rules: self.risk_rules,
                child_workflow: self.child_workflow,
                workflow_token: self.workflow_token,
            },
        )?;

        let mut actions: HashMap<String, Arc<dyn StateAction>> = self.actions.into_iter().collect();
        let mut plugin_actions = HashSet::new();
        for (name, action) in non_blocking {
            if actions.insert(name.clone(), action).is_some() {
                tracing::warn!(action = %name, "State plugin replaces the action of the same name");
            }
            plugin_actions.insert(name);
        }

        let span = match &self.logger {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, || {
                tracing::info_span!("workflow_runner", runtime_id = %self.runtime_id)
            }),
            None => tracing::info_span!("workflow_runner", runtime_id = %self.runtime_id),
        };

        tracing::debug!(
            runtime_id = %self.runtime_id,
            definition = definition.name(),
            state = %state,
            plugins = registry.len(),
            "Workflow runner built"
        );

        Ok(WorkflowRunner {
            runtime_id: self.runtime_id,
            definition,
            machine,
            registry,
            runtime_config: self.runtime_config,
            state,
            context,
            subscriptions: self.subscriptions,
            actions,
            plugin_actions,
            config,
            dispatch: self.logger,
            span,
        })
    }
}

/// Non-blocking state plugins become entry (`pre`) or exit (`post`) actions
fn inject_state_plugin_actions(
    definition: &mut WorkflowDefinition,
    plugins: &[StatePlugin],
) -> Result<(), PluginConstructionError> {
    for plugin in plugins.iter().filter(|plugin| !plugin.is_blocking) {
        for state_name in &plugin.state_names {
            let node = definition
                .state_mut(state_name)
                .ok_or_else(|| PluginConstructionError::UndefinedState {
                    plugin: plugin.name.clone(),
                    state: state_name.clone(),
                })?;
            let actions = match plugin.when {
                PluginTiming::Pre => &mut node.entry,
                PluginTiming::Post => &mut node.exit,
            };
            if !actions.iter().any(|action| action.name() == plugin.name) {
                actions.push(ActionRef::Name(plugin.name.clone()));
            }
        }
    }
    Ok(())
}

/// A non-empty resumption context wins over the definition's seed
fn resume_context(machine_context: Option<Value>, seed: Option<&Value>) -> RunnerResult<Value> {
    let context = match machine_context {
        Some(Value::Object(map)) if !map.is_empty() => Value::Object(map),
        Some(Value::Null) | Some(Value::Object(_)) | None => seed.cloned().unwrap_or_else(|| Value::Object(Map::new())),
        Some(other) => return Err(RunnerError::InvalidContext(type_name(&other).to_string())),
    };
    if !context.is_object() {
        return Err(RunnerError::InvalidContext(type_name(&context).to_string()));
    }
    Ok(context)
}
