//! Plugin registry: turns schemas into live plugins once per runner

use crate::context::{fetch_transformers, TransformerError, ValidatorError};
use crate::plugins::callbacks::{ChildWorkflowInvoker, RiskRulesInvoker, WorkflowTokenInvoker};
use crate::plugins::child_workflow::ChildWorkflowPlugin;
use crate::plugins::common::{
    ActionPlugin, CommonPlugin, IterativePlugin, RiskRulesPlugin, TransformerPlugin, WorkflowTokenPlugin,
};
use crate::plugins::dispatch_event::DispatchEventPlugin;
use crate::plugins::http::HttpPlugin;
use crate::plugins::schema::{CommonPluginSchema, HttpPluginSchema, PluginExtensions};
use crate::plugins::state::{PluginTiming, StatePlugin};
use crate::plugins::transport::HttpTransport;
use crate::plugins::{applies_to, PluginFamily, PluginKind, UnknownPluginKind};
use crate::workflow::{Machine, StateValue};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building plugins; all are fatal to runner construction
#[derive(Debug, Error)]
pub enum PluginConstructionError {
    /// A transformer is unsupported or its mapping does not compile
    #[error("Transformer error: {0}")]
    Transformer(#[from] TransformerError),
    /// A validator is unsupported or its schema does not compile
    #[error("Validator error: {0}")]
    Validator(#[from] ValidatorError),
    /// `pluginKind` names no known kind
    #[error(transparent)]
    UnknownPluginKind(#[from] UnknownPluginKind),
    /// `pluginKind` is known but belongs to another plugin array
    #[error("Plugin '{name}' of kind '{kind}' cannot be declared among {family} plugins")]
    UnexpectedPluginKind {
        /// Plugin name
        name: String,
        /// Declared kind
        kind: String,
        /// Array the plugin was found in
        family: &'static str,
    },
    /// The plugin needs an injected callback that was not supplied
    #[error("Plugin '{plugin}' requires the {callback} callback")]
    MissingCallback {
        /// Plugin name
        plugin: String,
        /// Missing callback
        callback: &'static str,
    },
    /// A vendor kind was declared without `vendor`
    #[error("Plugin '{plugin}' of kind '{kind}' requires a vendor")]
    MissingVendor {
        /// Plugin name
        plugin: String,
        /// Declared kind
        kind: String,
    },
    /// A required schema field is absent
    #[error("Plugin '{plugin}' is missing '{field}'")]
    MissingField {
        /// Plugin name
        plugin: String,
        /// Schema field
        field: &'static str,
    },
    /// An iterative plugin names an action plugin that does not exist
    #[error("Plugin '{plugin}' references unknown action plugin '{action}'")]
    UnresolvedActionPlugin {
        /// Iterative plugin name
        plugin: String,
        /// Referenced action plugin
        action: String,
    },
    /// A plugin is bound to a state the definition does not declare
    #[error("Plugin '{plugin}' is bound to undefined state '{state}'")]
    UndefinedState {
        /// Plugin name
        plugin: String,
        /// Unknown state name
        state: String,
    },
    /// `persistResponseDestination` names no context path
    #[error("Plugin '{plugin}' has a blank persistResponseDestination '{destination}'")]
    BlankResponseDestination {
        /// Plugin name
        plugin: String,
        /// Declared destination
        destination: String,
    },
    /// Secrets could not be read
    #[error("Failed to load secrets: {0}")]
    Secrets(String),
    /// Two plugins share a name
    #[error("Duplicate plugin name '{0}'")]
    DuplicatePluginName(String),
    /// The HTTP transport could not be created
    #[error("Failed to create HTTP transport: {0}")]
    Transport(String),
}

/// Collaborators and runtime data needed to build plugins
pub struct RegistryContext<'a> {
    /// Runtime id of the workflow
    pub runtime_id: &'a str,
    /// Opaque runtime config
    pub runtime_config: &'a Value,
    /// Compiled chart, used to check state names
    pub machine: &'a Machine,
    /// Secrets available to HTTP plugin templates
    pub secrets: Arc<HashMap<String, String>>,
    /// Network layer of HTTP plugins
    pub transport: Arc<dyn HttpTransport>,
    /// Risk rules evaluation
    pub risk_rules: Option<Arc<dyn RiskRulesInvoker>>,
    /// Child workflow creation
    pub child_workflow: Option<Arc<dyn ChildWorkflowInvoker>>,
    /// UI token issuance
    pub workflow_token: Option<Arc<dyn WorkflowTokenInvoker>>,
}

/// A plugin found by name
#[derive(Debug, Clone)]
pub enum RegisteredPlugin {
    /// Dispatch-event plugin
    DispatchEvent(Arc<DispatchEventPlugin>),
    /// Common or child workflow plugin
    Common(CommonPlugin),
    /// HTTP plugin
    Api(Arc<HttpPlugin>),
}

/// Plugins to run after entering a state, grouped by family in invocation order
#[derive(Debug, Clone, Default)]
pub struct StatePluginSets {
    /// Dispatch-event plugins
    pub dispatch_event: Vec<Arc<DispatchEventPlugin>>,
    /// Common and child workflow plugins
    pub common: Vec<CommonPlugin>,
    /// HTTP plugins
    pub api: Vec<Arc<HttpPlugin>>,
    /// Blocking `post` state plugins
    pub post_blocking: Vec<StatePlugin>,
}

impl StatePluginSets {
    /// Whether no plugin applies
    pub fn is_empty(&self) -> bool {
        self.dispatch_event.is_empty() && self.common.is_empty() && self.api.is_empty() && self.post_blocking.is_empty()
    }
}

/// Live plugins of one runner
#[derive(Debug, Default)]
pub struct PluginRegistry {
    dispatch_event: Vec<Arc<DispatchEventPlugin>>,
    common: Vec<CommonPlugin>,
    api: Vec<Arc<HttpPlugin>>,
    state: Vec<StatePlugin>,
}

impl PluginRegistry {
    /// Build every plugin declared in `extensions` plus the caller's state plugins
    pub fn build(
        extensions: &PluginExtensions,
        state_plugins: Vec<StatePlugin>,
        ctx: &RegistryContext<'_>,
    ) -> Result<Self, PluginConstructionError> {
        let mut names = HashSet::new();
        let all_bindings = extensions
            .api_plugins
            .iter()
            .map(|p| (&p.name, &p.state_names))
            .chain(extensions.common_plugins.iter().map(|p| (&p.name, &p.state_names)))
            .chain(extensions.child_workflow_plugins.iter().map(|p| (&p.name, &p.state_names)))
            .chain(extensions.dispatch_event_plugins.iter().map(|p| (&p.name, &p.state_names)))
            .chain(state_plugins.iter().map(|p| (&p.name, &p.state_names)));
        for (name, state_names) in all_bindings {
            if !names.insert(name.as_str()) {
                return Err(PluginConstructionError::DuplicatePluginName(name.clone()));
            }
            if let Some(state) = state_names.iter().find(|s| !ctx.machine.has_state(s)) {
                return Err(PluginConstructionError::UndefinedState {
                    plugin: name.clone(),
                    state: state.clone(),
                });
            }
        }

        let destinations = extensions
            .api_plugins
            .iter()
            .map(|p| (&p.name, &p.persist_response_destination))
            .chain(extensions.common_plugins.iter().map(|p| (&p.name, &p.persist_response_destination)));
        for (name, destination) in destinations {
            if let Some(destination) = destination.as_ref().filter(|d| d.split('.').all(str::is_empty)) {
                return Err(PluginConstructionError::BlankResponseDestination {
                    plugin: name.clone(),
                    destination: destination.clone(),
                });
            }
        }

        let api = extensions
            .api_plugins
            .iter()
            .map(|schema| build_http_plugin(schema, ctx).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let children = if extensions.child_workflow_plugins.is_empty() {
            Vec::new()
        } else {
            let invoker = ctx
                .child_workflow
                .clone()
                .ok_or_else(|| PluginConstructionError::MissingCallback {
                    plugin: extensions.child_workflow_plugins[0].name.clone(),
                    callback: "child workflow",
                })?;
            extensions
                .child_workflow_plugins
                .iter()
                .map(|schema| {
                    ChildWorkflowPlugin::from_schema(schema, ctx.runtime_id, ctx.runtime_config, invoker.clone())
                        .map(Arc::new)
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut common = extensions
            .common_plugins
            .iter()
            .map(|schema| build_common_plugin(schema, &api, &children, ctx))
            .collect::<Result<Vec<_>, _>>()?;
        common.extend(children.into_iter().map(CommonPlugin::ChildWorkflow));

        let dispatch_event = extensions
            .dispatch_event_plugins
            .iter()
            .map(|schema| DispatchEventPlugin::from_schema(schema).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            api = api.len(),
            common = common.len(),
            dispatch_event = dispatch_event.len(),
            state = state_plugins.len(),
            "Plugins constructed"
        );

        Ok(Self {
            dispatch_event,
            common,
            api,
            state: state_plugins,
        })
    }

    /// Plugins that apply once `state` has been entered
    pub fn for_state(&self, state: &StateValue) -> StatePluginSets {
        StatePluginSets {
            dispatch_event: self
                .dispatch_event
                .iter()
                .filter(|p| applies_to(&p.state_names, state))
                .cloned()
                .collect(),
            common: self
                .common
                .iter()
                .filter(|p| applies_to(p.state_names(), state))
                .cloned()
                .collect(),
            api: self
                .api
                .iter()
                .filter(|p| applies_to(&p.state_names, state))
                .cloned()
                .collect(),
            post_blocking: self.blocking(state, PluginTiming::Post),
        }
    }

    /// Blocking state plugins of `state` with the given timing
    pub fn blocking(&self, state: &StateValue, when: PluginTiming) -> Vec<StatePlugin> {
        self.state
            .iter()
            .filter(|p| p.is_blocking && p.when == when && applies_to(&p.state_names, state))
            .cloned()
            .collect()
    }

    /// Non-blocking state plugins, run as chart entry or exit actions
    pub fn non_blocking(&self) -> impl Iterator<Item = &StatePlugin> {
        self.state.iter().filter(|p| !p.is_blocking)
    }

    /// Look up an API, common, child workflow or dispatch-event plugin
    pub fn find(&self, name: &str) -> Option<RegisteredPlugin> {
        if let Some(plugin) = self.api.iter().find(|p| p.name == name) {
            return Some(RegisteredPlugin::Api(plugin.clone()));
        }
        if let Some(plugin) = self.common.iter().find(|p| p.name() == name) {
            return Some(RegisteredPlugin::Common(plugin.clone()));
        }
        self.dispatch_event
            .iter()
            .find(|p| p.name == name)
            .map(|p| RegisteredPlugin::DispatchEvent(p.clone()))
    }

    /// Number of plugins, state plugins included
    pub fn len(&self) -> usize {
        self.dispatch_event.len() + self.common.len() + self.api.len() + self.state.len()
    }

    /// Whether no plugin is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build_http_plugin(schema: &HttpPluginSchema, ctx: &RegistryContext<'_>) -> Result<HttpPlugin, PluginConstructionError> {
    let kind = match &schema.plugin_kind {
        Some(kind) => {
            let kind: PluginKind = kind.parse()?;
            if kind.family() != PluginFamily::Api {
                return Err(PluginConstructionError::UnexpectedPluginKind {
                    name: schema.name.clone(),
                    kind: kind.to_string(),
                    family: "api",
                });
            }
            kind
        }
        None if schema.success_action.is_some() && schema.error_action.is_some() => PluginKind::Api,
        None => PluginKind::Webhook,
    };
    HttpPlugin::from_schema(schema, kind, ctx.secrets.clone(), ctx.transport.clone())
}

fn build_common_plugin(
    schema: &CommonPluginSchema,
    api: &[Arc<HttpPlugin>],
    children: &[Arc<ChildWorkflowPlugin>],
    ctx: &RegistryContext<'_>,
) -> Result<CommonPlugin, PluginConstructionError> {
    let kind = match &schema.plugin_kind {
        Some(kind) => kind.parse()?,
        None if !schema.transformers.is_empty() && schema.action_plugin_name.is_none() => PluginKind::Transformer,
        None => PluginKind::Iterative,
    };

    match kind {
        PluginKind::RiskRules => {
            let invoker = ctx.risk_rules.clone().ok_or_else(|| PluginConstructionError::MissingCallback {
                plugin: schema.name.clone(),
                callback: "risk rules",
            })?;
            Ok(CommonPlugin::RiskRules(Arc::new(RiskRulesPlugin {
                name: schema.name.clone(),
                state_names: schema.state_names.clone(),
                persist_response_destination: schema.persist_response_destination.clone(),
                success_action: schema.success_action.clone(),
                error_action: schema.error_action.clone(),
                rules_source: schema.rules_source.clone().unwrap_or(Value::Null),
                invoker,
            })))
        }
        PluginKind::AttachUiDefinition => {
            let invoker = ctx.workflow_token.clone().ok_or_else(|| PluginConstructionError::MissingCallback {
                plugin: schema.name.clone(),
                callback: "workflow token",
            })?;
            let ui_definition_id = schema
                .ui_definition_id
                .clone()
                .ok_or_else(|| PluginConstructionError::MissingField {
                    plugin: schema.name.clone(),
                    field: "uiDefinitionId",
                })?;
            Ok(CommonPlugin::WorkflowToken(Arc::new(WorkflowTokenPlugin {
                name: schema.name.clone(),
                state_names: schema.state_names.clone(),
                persist_response_destination: schema.persist_response_destination.clone(),
                ui_definition_id,
                expire_in_minutes: schema.expire_in_minutes,
                success_action: schema.success_action.clone(),
                error_action: schema.error_action.clone(),
                invoker,
            })))
        }
        PluginKind::Transformer => Ok(CommonPlugin::Transformer(Arc::new(TransformerPlugin {
            name: schema.name.clone(),
            state_names: schema.state_names.clone(),
            persist_response_destination: schema.persist_response_destination.clone(),
            transformers: fetch_transformers(&schema.transformers)?,
        }))),
        PluginKind::Iterative => {
            let action_name = schema
                .action_plugin_name
                .as_ref()
                .ok_or_else(|| PluginConstructionError::MissingField {
                    plugin: schema.name.clone(),
                    field: "actionPluginName",
                })?;
            let action = api
                .iter()
                .find(|p| &p.name == action_name)
                .map(|p| ActionPlugin::Http(p.clone()))
                .or_else(|| {
                    children
                        .iter()
                        .find(|p| &p.name == action_name)
                        .map(|p| ActionPlugin::ChildWorkflow(p.clone()))
                })
                .ok_or_else(|| PluginConstructionError::UnresolvedActionPlugin {
                    plugin: schema.name.clone(),
                    action: action_name.clone(),
                })?;
            Ok(CommonPlugin::Iterative(Arc::new(IterativePlugin {
                name: schema.name.clone(),
                state_names: schema.state_names.clone(),
                persist_response_destination: schema.persist_response_destination.clone(),
                success_action: schema.success_action.clone(),
                error_action: schema.error_action.clone(),
                iterate_on: fetch_transformers(&schema.iterate_on)?,
                action,
            })))
        }
        other => Err(PluginConstructionError::UnexpectedPluginKind {
            name: schema.name.clone(),
            kind: other.to_string(),
            family: "common",
        }),
    }
}
