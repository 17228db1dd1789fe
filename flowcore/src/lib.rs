//! # flowcore
//!
//! A statechart-driven workflow runner with pluggable side-effecting actions.
//!
//! ## Features
//!
//! - **Definitions as data**: state charts are loaded from JSON or YAML documents
//! - **Plugins**: HTTP, common, dispatch-event and state plugins run around transitions
//! - **Context engine**: deep merges, JMESPath transformers and JSON schema validators
//! - **Notifications**: subscribers observe state changes, guard failures and plugin status
//! - **Webhooks**: signed `workflow.state.changed` deliveries
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowcore::prelude::*;
//!
//! # async fn run() -> flowcore::Result<()> {
//! let definition = WorkflowDefinition::from_json_str(r#"{
//!     "initial": "open",
//!     "states": {
//!         "open": {"on": {"next": "pending"}},
//!         "pending": {"on": {"next": "closed"}},
//!         "closed": {"type": "final"}
//!     }
//! }"#)?;
//!
//! let mut runner = WorkflowRunnerBuilder::new("runtime-1", definition).build()?;
//! runner.send_event(WorkflowEvent::new("next")).await?;
//! assert_eq!(runner.state(), &StateValue::from("pending"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Common utilities shared across the engine
pub mod common;

/// Engine configuration
pub mod config;

/// Context merge, transform and validation engine
pub mod context;

/// Error types used throughout the library
pub mod error;

/// Plugin families, schemas and the plugin registry
pub mod plugins;

/// Credential lookup for HTTP plugins
pub mod secrets;

/// Liquid templating of plugin URLs and headers
pub mod template;

/// Validation of definitions and plugin extensions
pub mod validation;

/// Outbound webhooks for state changes
pub mod webhooks;

/// State chart model, interpreter and runner
pub mod workflow;

pub use config::Config;
pub use error::{ErrorChainExt, ErrorContext, FlowCoreError, Result};
pub use plugins::{PluginError, PluginExtensions, PluginRegistry};
pub use secrets::{EnvSecretsManager, InMemorySecretsManager, SecretsManager};
pub use template::Template;
pub use workflow::{
    RunnerError, StateValue, WorkflowDefinition, WorkflowEvent, WorkflowNotification, WorkflowRunner,
    WorkflowRunnerBuilder,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Config, FlowCoreError, PluginExtensions, Result, RunnerError, StateValue, WorkflowDefinition,
        WorkflowEvent, WorkflowNotification, WorkflowRunner, WorkflowRunnerBuilder,
    };

    pub use crate::plugins::{PluginTiming, StateAction, StateActionInput, StatePlugin};
    pub use crate::workflow::{notifications, Subscriber, SubscriberError};
}
