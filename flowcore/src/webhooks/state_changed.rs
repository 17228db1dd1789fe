//! Delivery of `workflow.state.changed` webhooks

use super::sign::sign;
use super::{WebhookError, WORKFLOW_STATE_CHANGED};
use crate::config::Config;
use crate::context::get_path;
use crate::plugins::{HttpMethod, HttpRequest, HttpTransport};
use crate::workflow::{StateValue, Subscriber, SubscriberError, WorkflowNotification};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Header carrying the shared secret
pub const AUTHORIZATION_HEADER: &str = "X-Authorization";

/// Header carrying the payload signature
pub const SIGNATURE_HEADER: &str = "X-HMAC-Signature";

/// Persisted data of a workflow instance, as webhooks report it
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRuntimeData {
    /// Runtime id
    pub id: String,
    /// Definition id
    pub workflow_definition_id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Resolution time, once the workflow is done
    pub resolved_at: Option<DateTime<Utc>>,
    /// Runtime config; its `subscriptions` select the webhooks
    pub config: Value,
    /// Context at the time of the change
    pub context: Value,
}

/// A state change worth reporting
#[derive(Debug, Clone, PartialEq)]
pub struct StateChangedEvent {
    /// New state
    pub state: StateValue,
    /// Entity the workflow runs for
    pub entity_id: Option<String>,
    /// Caller supplied correlation id
    pub correlation_id: Option<String>,
    /// Workflow instance
    pub runtime_data: WorkflowRuntimeData,
}

/// A resolved webhook target
#[derive(Debug, Clone, PartialEq)]
pub struct Webhook {
    /// Delivery id
    pub id: String,
    /// Target URL
    pub url: String,
    /// Environment the delivery originates from
    pub environment: String,
    /// Payload version
    pub api_version: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionConfig {
    #[serde(rename = "type")]
    kind: String,
    url: String,
    #[serde(default)]
    events: Vec<String>,
}

/// Webhook targets of `event` declared in `config.subscriptions`
pub fn get_webhooks(config: &Value, environment: &str, event: &str) -> Vec<Webhook> {
    let Some(subscriptions) = config.get("subscriptions").and_then(Value::as_array) else {
        return Vec::new();
    };
    subscriptions
        .iter()
        .filter_map(|entry| match SubscriptionConfig::deserialize(entry) {
            Ok(subscription) => Some(subscription),
            Err(error) => {
                tracing::warn!(%error, "Ignoring malformed subscription");
                None
            }
        })
        .filter(|subscription| subscription.kind == "webhook" && subscription.events.iter().any(|e| e == event))
        .map(|subscription| Webhook {
            id: ulid::Ulid::new().to_string(),
            url: subscription.url,
            environment: environment.to_string(),
            api_version: env!("CARGO_PKG_VERSION").to_string(),
        })
        .collect()
}

/// Posts signed `workflow.state.changed` payloads to subscribed webhooks
///
/// Delivery is best effort: each webhook gets one attempt and failures are
/// logged, never returned.
#[derive(Clone)]
pub struct WorkflowStateChangedWebhookCaller {
    transport: Arc<dyn HttpTransport>,
    shared_secret: String,
    environment_name: String,
    delay: Duration,
}

impl fmt::Debug for WorkflowStateChangedWebhookCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowStateChangedWebhookCaller")
            .field("transport", &self.transport)
            .field("environment_name", &self.environment_name)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl WorkflowStateChangedWebhookCaller {
    /// Create a caller signing with `shared_secret`
    pub fn new(transport: Arc<dyn HttpTransport>, shared_secret: impl Into<String>, config: &Config) -> Self {
        Self {
            transport,
            shared_secret: shared_secret.into(),
            environment_name: config.environment_name.clone(),
            delay: config.webhook_delay(),
        }
    }

    /// Wait the configured delay, then deliver `event` to every subscribed webhook
    pub async fn handle_workflow_event(&self, event: &StateChangedEvent) {
        tracing::info!(
            state = %event.state,
            entity_id = ?event.entity_id,
            correlation_id = ?event.correlation_id,
            runtime_id = %event.runtime_data.id,
            "Handling workflow state change"
        );
        let webhooks = get_webhooks(&event.runtime_data.config, &self.environment_name, WORKFLOW_STATE_CHANGED);
        if webhooks.is_empty() {
            return;
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        for webhook in &webhooks {
            if let Err(error) = self.send_webhook(event, webhook).await {
                tracing::error!(
                    id = %webhook.id,
                    url = %webhook.url,
                    runtime_id = %event.runtime_data.id,
                    correlation_id = ?event.correlation_id,
                    %error,
                    "Failed to send webhook"
                );
            }
        }
    }

    /// Body posted to `webhook`
    pub fn payload(&self, event: &StateChangedEvent, webhook: &Webhook) -> Value {
        let runtime = &event.runtime_data;
        json!({
            "id": webhook.id,
            "eventName": WORKFLOW_STATE_CHANGED,
            "state": event.state,
            "apiVersion": webhook.api_version,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "workflowCreatedAt": runtime.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "workflowResolvedAt": runtime.resolved_at.map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            "workflowDefinitionId": runtime.workflow_definition_id,
            "workflowRuntimeId": runtime.id,
            "ballerineEntityId": event.entity_id,
            "correlationId": event.correlation_id,
            "environment": webhook.environment,
            "data": runtime.context,
        })
    }

    async fn send_webhook(&self, event: &StateChangedEvent, webhook: &Webhook) -> Result<(), WebhookError> {
        tracing::info!(id = %webhook.id, url = %webhook.url, "Sending webhook");
        let payload = self.payload(event, webhook);
        let signature = sign(&serde_json::to_vec(&payload)?, &self.shared_secret)?;

        let headers = BTreeMap::from([
            (AUTHORIZATION_HEADER.to_string(), self.shared_secret.clone()),
            (SIGNATURE_HEADER.to_string(), signature),
        ]);
        let response = self
            .transport
            .send(HttpRequest {
                method: HttpMethod::Post,
                url: webhook.url.clone(),
                headers,
                body: payload,
            })
            .await?;

        if !response.is_success() {
            return Err(WebhookError::Rejected {
                url: webhook.url.clone(),
                status: response.status,
            });
        }
        tracing::info!(id = %webhook.id, status = response.status, "Webhook delivered");
        Ok(())
    }
}

/// Bridges a runner's `STATE_UPDATE` notifications to a webhook caller
///
/// Each notification is delivered on a spawned task so that the webhook delay
/// never holds up event processing.
#[derive(Debug)]
pub struct StateChangedWebhookSubscriber {
    caller: Arc<WorkflowStateChangedWebhookCaller>,
    runtime: WorkflowRuntimeData,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl StateChangedWebhookSubscriber {
    /// Report changes of the instance described by `runtime`
    pub fn new(caller: Arc<WorkflowStateChangedWebhookCaller>, runtime: WorkflowRuntimeData) -> Self {
        Self {
            caller,
            runtime,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Wait for every delivery started so far
    pub async fn flush(&self) {
        let handles = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::error!(%error, "Webhook delivery task failed");
            }
        }
    }

    fn event_for(&self, notification: &WorkflowNotification) -> Option<StateChangedEvent> {
        let state = notification.state.clone()?;
        let context = notification
            .context
            .clone()
            .unwrap_or_else(|| self.runtime.context.clone());
        let entity_field = |field: &str| {
            get_path(&context, &format!("entity.{field}"))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Some(StateChangedEvent {
            state,
            entity_id: entity_field("ballerineEntityId"),
            correlation_id: entity_field("id"),
            runtime_data: WorkflowRuntimeData {
                context,
                ..self.runtime.clone()
            },
        })
    }
}

#[async_trait]
impl Subscriber for StateChangedWebhookSubscriber {
    async fn notify(&self, notification: &WorkflowNotification) -> Result<(), SubscriberError> {
        let Some(event) = self.event_for(notification) else {
            tracing::debug!(notification = %notification.notification_type, "State update without state; no webhook");
            return Ok(());
        };

        let caller = self.caller.clone();
        let handle = tokio::spawn(
            async move { caller.handle_workflow_event(&event).await }.in_current_span(),
        );
        match self.pending.lock() {
            Ok(mut pending) => {
                pending.retain(|handle| !handle.is_finished());
                pending.push(handle);
            }
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::ReqwestTransport;
    use crate::webhooks::sign::verify;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn config() -> Config {
        Config {
            webhook_delay_ms: 0,
            environment_name: "sandbox".to_string(),
            ..Config::default()
        }
    }

    fn runtime(url: &str) -> WorkflowRuntimeData {
        WorkflowRuntimeData {
            id: "wf-1".to_string(),
            workflow_definition_id: "kyb".to_string(),
            created_at: DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
            resolved_at: None,
            config: json!({"subscriptions": [
                {"type": "webhook", "url": url, "events": [WORKFLOW_STATE_CHANGED]},
                {"type": "webhook", "url": "http://unused.test", "events": ["workflow.completed"]},
                {"type": "email", "url": "mailto:ops", "events": [WORKFLOW_STATE_CHANGED]}
            ]}),
            context: json!({"entity": {"id": "corr-1", "ballerineEntityId": "ent-1"}}),
        }
    }

    fn caller() -> WorkflowStateChangedWebhookCaller {
        let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap());
        WorkflowStateChangedWebhookCaller::new(transport, "shh", &config())
    }

    #[test]
    fn test_get_webhooks_filters_by_type_and_event() {
        let webhooks = get_webhooks(&runtime("http://hook.test").config, "sandbox", WORKFLOW_STATE_CHANGED);
        assert_eq!(webhooks.len(), 1);
        assert_eq!(webhooks[0].url, "http://hook.test");
        assert_eq!(webhooks[0].environment, "sandbox");
        assert!(get_webhooks(&json!({}), "sandbox", WORKFLOW_STATE_CHANGED).is_empty());
    }

    #[tokio::test]
    async fn test_handle_workflow_event_posts_signed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header(AUTHORIZATION_HEADER, "shh"))
            .and(header_exists(SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let event = StateChangedEvent {
            state: StateValue::from("approved"),
            entity_id: Some("ent-1".to_string()),
            correlation_id: Some("corr-1".to_string()),
            runtime_data: runtime(&format!("{}/hook", server.uri())),
        };
        caller().handle_workflow_event(&event).await;

        let requests: Vec<Request> = server.received_requests().await.unwrap();
        let request = &requests[0];
        let signature = request.headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
        assert!(verify(&request.body, "shh", signature));

        let body: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["eventName"], json!(WORKFLOW_STATE_CHANGED));
        assert_eq!(body["state"], json!("approved"));
        assert_eq!(body["workflowRuntimeId"], json!("wf-1"));
        assert_eq!(body["workflowDefinitionId"], json!("kyb"));
        assert_eq!(body["workflowCreatedAt"], json!("2024-01-02T03:04:05.000Z"));
        assert_eq!(body["workflowResolvedAt"], Value::Null);
        assert_eq!(body["ballerineEntityId"], json!("ent-1"));
        assert_eq!(body["correlationId"], json!("corr-1"));
        assert_eq!(body["environment"], json!("sandbox"));
        assert_eq!(body["data"]["entity"]["id"], json!("corr-1"));
    }

    #[tokio::test]
    async fn test_delivery_failures_are_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let event = StateChangedEvent {
            state: StateValue::from("rejected"),
            entity_id: None,
            correlation_id: None,
            runtime_data: runtime(&format!("{}/hook", server.uri())),
        };
        caller().handle_workflow_event(&event).await;
    }

    #[tokio::test]
    async fn test_subscriber_delivers_state_updates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let subscriber = StateChangedWebhookSubscriber::new(
            Arc::new(caller()),
            runtime(&format!("{}/hook", server.uri())),
        );
        let notification = WorkflowNotification::new("approve")
            .state(StateValue::from("approved"))
            .context(json!({"entity": {"id": "corr-9", "ballerineEntityId": "ent-9"}}));
        subscriber.notify(&notification).await.unwrap();
        subscriber.flush().await;

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["state"], json!("approved"));
        assert_eq!(body["correlationId"], json!("corr-9"));
        assert_eq!(body["ballerineEntityId"], json!("ent-9"));
    }
}
