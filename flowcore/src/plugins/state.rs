//! State plugins and named workflow actions

use crate::plugins::PluginError;
use crate::workflow::{StateValue, WorkflowEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// When a state plugin runs relative to its state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginTiming {
    /// Before leaving the state (blocking) or on entry (non-blocking)
    Pre,
    /// After entering the state (blocking) or on exit (non-blocking)
    Post,
}

/// What an action sees when it runs
#[derive(Debug, Clone, PartialEq)]
pub struct StateActionInput {
    /// Runtime id of the workflow
    pub workflow_id: String,
    /// Context at invocation time
    pub context: Value,
    /// Event being processed
    pub event: WorkflowEvent,
    /// Active state at invocation time
    pub state: StateValue,
}

/// A named side effect callable from the state chart or a state plugin
#[async_trait::async_trait]
pub trait StateAction: Send + Sync {
    /// Run the action
    async fn execute(&self, input: StateActionInput) -> Result<(), PluginError>;
}

#[async_trait::async_trait]
impl<F, Fut> StateAction for F
where
    F: Fn(StateActionInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), PluginError>> + Send,
{
    async fn execute(&self, input: StateActionInput) -> Result<(), PluginError> {
        (self)(input).await
    }
}

/// A caller supplied plugin bound to states
///
/// Blocking plugins gate `send_event`: `pre` ones run before the event reaches
/// the interpreter, `post` ones after every other plugin family. Non-blocking
/// plugins become entry (`pre`) or exit (`post`) actions of their states.
#[derive(Clone)]
pub struct StatePlugin {
    /// Unique plugin name, also the injected action name
    pub name: String,
    /// States the plugin is bound to
    pub state_names: Vec<String>,
    /// Timing relative to the state
    pub when: PluginTiming,
    /// Whether the plugin gates event processing
    pub is_blocking: bool,
    /// Side effect
    pub action: Arc<dyn StateAction>,
}

impl fmt::Debug for StatePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatePlugin")
            .field("name", &self.name)
            .field("state_names", &self.state_names)
            .field("when", &self.when)
            .field("is_blocking", &self.is_blocking)
            .finish_non_exhaustive()
    }
}

impl StatePlugin {
    /// Create a plugin
    pub fn new(
        name: impl Into<String>,
        state_names: Vec<String>,
        when: PluginTiming,
        is_blocking: bool,
        action: Arc<dyn StateAction>,
    ) -> Self {
        Self {
            name: name.into(),
            state_names,
            when,
            is_blocking,
            action,
        }
    }
}
