//! HTTP plugins: API calls, webhooks and vendor integrations

use crate::context::{apply_transformers, fetch_transformers, fetch_validator, shallow_merge, Transformer, Validator};
use crate::plugins::registry::PluginConstructionError;
use crate::plugins::schema::{HttpPluginSchema, ValidatableTransformerSchema};
use crate::plugins::transport::{HttpMethod, HttpRequest, HttpTransport};
use crate::plugins::{PluginError, PluginKind};
use crate::template::render_template;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Transformer chain followed by an optional schema check
#[derive(Debug, Default)]
pub struct ValidatableTransformer {
    transformers: Vec<Transformer>,
    validator: Option<Validator>,
}

impl ValidatableTransformer {
    /// Compile a schema; `None` yields the identity with no validation
    pub fn from_schema(schema: Option<&ValidatableTransformerSchema>) -> Result<Self, PluginConstructionError> {
        let Some(schema) = schema else {
            return Ok(Self::default());
        };
        Ok(Self {
            transformers: fetch_transformers(&schema.transform)?,
            validator: fetch_validator("json-schema", schema.schema.as_ref())?,
        })
    }

    /// Transform `input`, then validate the result
    pub fn apply(&self, input: &Value) -> Result<Value, PluginError> {
        let output = apply_transformers(&self.transformers, input)?;
        if let Some(validator) = &self.validator {
            validator.validate(&output)?;
        }
        Ok(output)
    }
}

/// Result of an HTTP plugin invocation; failures are carried, never raised
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpPluginOutput {
    /// Event to send back into the runner
    pub callback_action: Option<String>,
    /// Transformed response body on success
    pub response_body: Option<Value>,
    /// Failure, if any
    pub error: Option<PluginError>,
}

/// A live HTTP plugin
pub struct HttpPlugin {
    /// Unique plugin name
    pub name: String,
    /// Resolved kind
    pub kind: PluginKind,
    /// Vendor forwarded by vendor kinds
    pub vendor: Option<String>,
    /// Human readable name
    pub display_name: Option<String>,
    /// States that trigger the plugin
    pub state_names: Vec<String>,
    /// Event sent after success
    pub success_action: Option<String>,
    /// Event sent after failure
    pub error_action: Option<String>,
    /// Dotted context path receiving the response body
    pub persist_response_destination: Option<String>,
    url: String,
    method: HttpMethod,
    headers: BTreeMap<String, String>,
    request: ValidatableTransformer,
    response: ValidatableTransformer,
    secrets: Arc<HashMap<String, String>>,
    transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for HttpPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPlugin")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("state_names", &self.state_names)
            .finish_non_exhaustive()
    }
}

impl HttpPlugin {
    /// Build a plugin of `kind` from its schema
    pub fn from_schema(
        schema: &HttpPluginSchema,
        kind: PluginKind,
        secrets: Arc<HashMap<String, String>>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, PluginConstructionError> {
        if matches!(kind, PluginKind::Vendor(_)) && schema.vendor.is_none() {
            return Err(PluginConstructionError::MissingVendor {
                plugin: schema.name.clone(),
                kind: kind.as_str().to_string(),
            });
        }

        let method = match kind {
            PluginKind::Email => HttpMethod::Post,
            _ => schema.method.unwrap_or_default(),
        };

        Ok(Self {
            name: schema.name.clone(),
            kind,
            vendor: schema.vendor.clone(),
            display_name: schema.display_name.clone(),
            state_names: schema.state_names.clone(),
            success_action: schema.success_action.clone(),
            error_action: schema.error_action.clone(),
            persist_response_destination: schema.persist_response_destination.clone(),
            url: schema.url.clone(),
            method,
            headers: schema.headers.clone(),
            request: ValidatableTransformer::from_schema(schema.request.as_ref())?,
            response: ValidatableTransformer::from_schema(schema.response.as_ref())?,
            secrets,
            transport,
        })
    }

    /// HTTP method used for the call
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Whether the plugin sends callback events back into the runner
    pub fn has_callback_actions(&self) -> bool {
        self.kind != PluginKind::Webhook && self.success_action.is_some() && self.error_action.is_some()
    }

    /// Call the endpoint with `input` as the transformation source
    pub async fn invoke(&self, input: &Value) -> HttpPluginOutput {
        match self.call(input).await {
            Ok(body) => {
                tracing::debug!(plugin = %self.name, "HTTP plugin succeeded");
                HttpPluginOutput {
                    callback_action: self.callback(self.success_action.as_ref()),
                    response_body: Some(body),
                    error: None,
                }
            }
            Err(error) => {
                tracing::warn!(plugin = %self.name, error = %error, "HTTP plugin failed");
                HttpPluginOutput {
                    callback_action: self.callback(self.error_action.as_ref()),
                    response_body: None,
                    error: Some(error),
                }
            }
        }
    }

    fn callback(&self, action: Option<&String>) -> Option<String> {
        match self.kind {
            PluginKind::Webhook => None,
            _ => action.cloned(),
        }
    }

    async fn call(&self, input: &Value) -> Result<Value, PluginError> {
        let mut body = self.request.apply(input)?;
        if let (PluginKind::Vendor(_), Some(vendor)) = (self.kind, &self.vendor) {
            match &mut body {
                Value::Object(map) => {
                    map.insert("vendor".to_string(), Value::String(vendor.clone()));
                }
                Value::Null => body = json!({ "vendor": vendor }),
                _ => {
                    return Err(PluginError::Execution(format!(
                        "Plugin '{}' must send an object body to forward its vendor",
                        self.name
                    )))
                }
            }
        }

        let template_data = shallow_merge(input, Some(&json!({ "secrets": self.secrets.as_ref() })));
        let url = render_template(&self.url, &template_data).map_err(|e| PluginError::Execution(e.to_string()))?;
        let mut headers = BTreeMap::new();
        for (name, value) in &self.headers {
            let rendered = render_template(value, &template_data).map_err(|e| PluginError::Execution(e.to_string()))?;
            headers.insert(name.clone(), rendered);
        }

        tracing::debug!(plugin = %self.name, method = %self.method, url = %url, "Calling HTTP plugin");
        let response = self
            .transport
            .send(HttpRequest {
                method: self.method,
                url,
                headers,
                body,
            })
            .await?;

        if !response.is_success() {
            let body = match response.body {
                Value::String(text) => text,
                other => other.to_string(),
            };
            return Err(PluginError::Http {
                status: response.status,
                body,
            });
        }

        self.response.apply(&response.body)
    }
}
