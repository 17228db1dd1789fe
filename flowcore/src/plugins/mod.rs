//! Plugins: side-effecting units bound to workflow states
//!
//! Plugins are declared as serializable schemas (see [`schema`]) and turned
//! into live objects by the [`registry`]. Four families exist, invoked in this
//! order after a transition: dispatch-event, common, API (HTTP), and blocking
//! state plugins.

pub mod callbacks;
pub mod child_workflow;
pub mod common;
pub mod dispatch_event;
pub mod http;
pub mod registry;
pub mod schema;
pub mod state;
pub mod transport;

pub use callbacks::{
    ChildInitOptions, ChildWorkflowInvoker, ChildWorkflowRequest, RiskRulesInvoker, RiskRulesRequest,
    UnavailableCallbacks, WorkflowTokenInvoker, WorkflowTokenRequest,
};
pub use child_workflow::ChildWorkflowPlugin;
pub use common::{
    ActionPlugin, CommonPlugin, CommonPluginOutput, IterativePlugin, RiskRulesPlugin, TransformerPlugin,
    WorkflowTokenPlugin,
};
pub use dispatch_event::DispatchEventPlugin;
pub use http::{HttpPlugin, HttpPluginOutput, ValidatableTransformer};
pub use registry::{PluginConstructionError, PluginRegistry, RegisteredPlugin, RegistryContext, StatePluginSets};
pub use schema::PluginExtensions;
pub use state::{PluginTiming, StateAction, StateActionInput, StatePlugin};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

use crate::context::{TransformerError, ValidatorError};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while invoking a plugin
///
/// These are captured per plugin and recorded into the context; they never
/// abort a transition.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PluginError {
    /// The remote endpoint answered with a non-success status
    #[error("Request failed with status {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body, as text
        body: String,
    },
    /// The request could not be performed
    #[error("Transport error: {0}")]
    Transport(String),
    /// Request or response payload failed schema validation
    #[error("Validation failed: {0}")]
    Validation(String),
    /// A transformer failed
    #[error("Transformation failed: {0}")]
    Transform(String),
    /// An injected callback failed
    #[error("Callback failed: {0}")]
    Callback(String),
    /// Any other failure
    #[error("{0}")]
    Execution(String),
}

impl PluginError {
    /// Whether this is the HTTP class of error
    pub fn is_http(&self) -> bool {
        matches!(self, PluginError::Http { .. })
    }
}

impl From<TransformerError> for PluginError {
    fn from(err: TransformerError) -> Self {
        PluginError::Transform(err.to_string())
    }
}

impl From<ValidatorError> for PluginError {
    fn from(err: ValidatorError) -> Self {
        PluginError::Validation(err.to_string())
    }
}

/// Vendor API kinds; these require a `vendor` and forward it in the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VendorKind {
    /// Ultimate beneficial owners lookup
    Ubo,
    /// Company registry lookup
    RegistryInformation,
    /// Sanctions screening of a person
    IndividualSanctions,
    /// Sanctions screening of a company
    CompanySanctions,
    /// Merchant website monitoring
    MerchantMonitoring,
}

/// Every plugin kind a schema may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// Callback-driven HTTP call
    Api,
    /// Fire-and-forget HTTP call
    Webhook,
    /// KYC vendor call
    Kyc,
    /// KYC session creation
    KycSession,
    /// KYB vendor call
    Kyb,
    /// Email dispatch, always POSTed
    Email,
    /// Vendor API call
    Vendor(VendorKind),
    /// Iterate over a list, invoking an action plugin per item
    Iterative,
    /// Pure context transformation
    Transformer,
    /// Risk rule evaluation through an injected callback
    RiskRules,
    /// UI token issuance through an injected callback
    AttachUiDefinition,
    /// Child workflow spawn through an injected callback
    ChildWorkflow,
    /// Notify local subscribers of a computed event
    DispatchEvent,
}

/// The plugin families, in invocation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginFamily {
    /// Dispatch-event plugins
    DispatchEvent,
    /// Iterative, transformer, risk-rules, UI-definition and child-workflow plugins
    Common,
    /// HTTP plugins
    Api,
}

/// Mapping table from schema names to plugin kinds
pub const PLUGIN_KINDS: &[(&str, PluginKind)] = &[
    ("api", PluginKind::Api),
    ("webhook", PluginKind::Webhook),
    ("kyc", PluginKind::Kyc),
    ("kyc-session", PluginKind::KycSession),
    ("kyb", PluginKind::Kyb),
    ("email", PluginKind::Email),
    ("ubo", PluginKind::Vendor(VendorKind::Ubo)),
    ("registry-information", PluginKind::Vendor(VendorKind::RegistryInformation)),
    ("individual-sanctions", PluginKind::Vendor(VendorKind::IndividualSanctions)),
    ("company-sanctions", PluginKind::Vendor(VendorKind::CompanySanctions)),
    ("merchant-monitoring", PluginKind::Vendor(VendorKind::MerchantMonitoring)),
    ("iterative", PluginKind::Iterative),
    ("transformer", PluginKind::Transformer),
    ("riskRules", PluginKind::RiskRules),
    ("attach-ui-definition", PluginKind::AttachUiDefinition),
    ("child-workflow", PluginKind::ChildWorkflow),
    ("dispatch-event", PluginKind::DispatchEvent),
];

/// A plugin kind name missing from [`PLUGIN_KINDS`]
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Unknown plugin kind '{0}'")]
pub struct UnknownPluginKind(pub String);

impl FromStr for PluginKind {
    type Err = UnknownPluginKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PLUGIN_KINDS
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| UnknownPluginKind(s.to_string()))
    }
}

impl PluginKind {
    /// Schema name of this kind
    pub fn as_str(&self) -> &'static str {
        PLUGIN_KINDS
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Family the kind is invoked in
    pub fn family(&self) -> PluginFamily {
        match self {
            PluginKind::Api
            | PluginKind::Webhook
            | PluginKind::Kyc
            | PluginKind::KycSession
            | PluginKind::Kyb
            | PluginKind::Email
            | PluginKind::Vendor(_) => PluginFamily::Api,
            PluginKind::Iterative
            | PluginKind::Transformer
            | PluginKind::RiskRules
            | PluginKind::AttachUiDefinition
            | PluginKind::ChildWorkflow => PluginFamily::Common,
            PluginKind::DispatchEvent => PluginFamily::DispatchEvent,
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a plugin bound to `state_names` applies to `state`
pub(crate) fn applies_to(state_names: &[String], state: &crate::workflow::StateValue) -> bool {
    state_names.iter().any(|name| state.matches(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_table_round_trips() {
        for (name, kind) in PLUGIN_KINDS {
            assert_eq!(name.parse::<PluginKind>().unwrap(), *kind);
            assert_eq!(kind.as_str(), *name);
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert_eq!(
            "carrier-pigeon".parse::<PluginKind>(),
            Err(UnknownPluginKind("carrier-pigeon".into()))
        );
    }

    #[test]
    fn test_families() {
        assert_eq!(PluginKind::Vendor(VendorKind::Ubo).family(), PluginFamily::Api);
        assert_eq!(PluginKind::ChildWorkflow.family(), PluginFamily::Common);
        assert_eq!(PluginKind::DispatchEvent.family(), PluginFamily::DispatchEvent);
    }

    #[test]
    fn test_http_class() {
        assert!(PluginError::Http {
            status: 500,
            body: String::new()
        }
        .is_http());
        assert!(!PluginError::Transport("refused".into()).is_http());
    }
}
