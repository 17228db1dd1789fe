//! Subscription bus for workflow notifications

use crate::workflow::event::WorkflowNotification;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a subscriber callback
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Subscriber failed: {0}")]
pub struct SubscriberError(pub String);

impl SubscriberError {
    /// Create a subscriber error from any message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receives notifications published by a runner
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Handle one notification
    async fn notify(&self, notification: &WorkflowNotification) -> Result<(), SubscriberError>;
}

#[async_trait]
impl<F, Fut> Subscriber for F
where
    F: Fn(WorkflowNotification) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SubscriberError>> + Send,
{
    async fn notify(&self, notification: &WorkflowNotification) -> Result<(), SubscriberError> {
        (self)(notification.clone()).await
    }
}

/// Subscribers grouped by notification name
#[derive(Default, Clone)]
pub struct Subscriptions {
    subscribers: HashMap<String, Vec<Arc<dyn Subscriber>>>,
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .subscribers
            .iter()
            .map(|(name, subscribers)| (name.as_str(), subscribers.len()))
            .collect();
        f.debug_struct("Subscriptions").field("subscribers", &counts).finish()
    }
}

impl Subscriptions {
    /// Register `subscriber` for notifications named `event_name`
    pub fn subscribe(&mut self, event_name: impl Into<String>, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.entry(event_name.into()).or_default().push(subscriber);
    }

    /// Number of subscribers for `event_name`
    pub fn count(&self, event_name: &str) -> usize {
        self.subscribers.get(event_name).map_or(0, Vec::len)
    }

    /// Deliver `notification` to every subscriber of `event_name` concurrently
    ///
    /// All subscribers run to completion; the first failure is returned.
    pub async fn notify(&self, event_name: &str, notification: &WorkflowNotification) -> Result<(), SubscriberError> {
        let Some(subscribers) = self.subscribers.get(event_name) else {
            return Ok(());
        };
        let results = join_all(subscribers.iter().map(|s| s.notify(notification))).await;
        results.into_iter().collect()
    }
}
