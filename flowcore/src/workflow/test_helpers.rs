//! Test helper functions for workflow module
//!
//! This module provides common test utilities to reduce code duplication
//! across workflow, plugin and runner tests.

#![cfg(test)]

use crate::plugins::{HttpRequest, HttpResponse, HttpTransport, PluginError};
use crate::workflow::{Subscriber, SubscriberError, WorkflowDefinition, WorkflowNotification};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Test helper to parse a definition from JSON
pub fn definition(value: Value) -> WorkflowDefinition {
    serde_json::from_value(value).unwrap()
}

/// `open -next-> pending -next-> closed (final)`
pub fn linear_definition() -> WorkflowDefinition {
    definition(json!({
        "id": "linear",
        "initial": "open",
        "states": {
            "open": {"on": {"next": "pending"}},
            "pending": {"on": {"next": "closed"}},
            "closed": {"type": "final"}
        }
    }))
}

/// Subscriber keeping every notification it receives
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    notifications: Mutex<Vec<WorkflowNotification>>,
}

impl RecordingSubscriber {
    /// A shareable recorder
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything received so far
    pub fn notifications(&self) -> Vec<WorkflowNotification> {
        self.notifications.lock().unwrap().clone()
    }

    /// Types of the received notifications, in order
    pub fn types(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .map(|n| n.notification_type)
            .collect()
    }
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    async fn notify(&self, notification: &WorkflowNotification) -> Result<(), SubscriberError> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Transport answering from a table keyed by URL; unknown URLs get a 404
#[derive(Debug, Default)]
pub struct CannedTransport {
    responses: HashMap<String, HttpResponse>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl CannedTransport {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `status` and `body`
    pub fn respond(mut self, url: &str, status: u16, body: Value) -> Self {
        self.responses.insert(url.to_string(), HttpResponse { status, body });
        self
    }

    /// Requests sent so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests sent to `url`
    pub fn calls_to(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.url == url).count()
    }
}

#[async_trait]
impl HttpTransport for CannedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PluginError> {
        let response = self.responses.get(&request.url).cloned().unwrap_or(HttpResponse {
            status: 404,
            body: json!({"message": "not found"}),
        });
        self.requests.lock().unwrap().push(request);
        Ok(response)
    }
}
