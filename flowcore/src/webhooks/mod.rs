//! Outbound webhooks
//!
//! The runner itself only emits `STATE_UPDATE` notifications. Delivering them
//! to customer endpoints is the job of a subscriber: a
//! [`StateChangedWebhookSubscriber`] wraps a [`WorkflowStateChangedWebhookCaller`]
//! that signs each payload and posts it once.

mod sign;
mod state_changed;

pub use sign::{sign, verify};
pub use state_changed::{
    get_webhooks, StateChangedEvent, StateChangedWebhookSubscriber, Webhook, WorkflowRuntimeData,
    WorkflowStateChangedWebhookCaller, AUTHORIZATION_HEADER, SIGNATURE_HEADER,
};

use crate::plugins::PluginError;
use thiserror::Error;

/// Name of the state change webhook event
pub const WORKFLOW_STATE_CHANGED: &str = "workflow.state.changed";

/// Errors raised while delivering a webhook
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The payload could not be serialized
    #[error("Failed to serialize webhook payload: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The payload could not be signed
    #[error("Failed to sign webhook payload: {0}")]
    Signing(String),
    /// The request did not reach the endpoint
    #[error(transparent)]
    Transport(#[from] PluginError),
    /// The endpoint answered with a non-success status
    #[error("Webhook {url} answered with status {status}")]
    Rejected {
        /// Target URL
        url: String,
        /// Status code
        status: u16,
    },
}
