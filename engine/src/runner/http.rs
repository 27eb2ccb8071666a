// HTTP job runner
// Reads the request from the task config params:
//   url, method, headers, body, auth { type: basic | bearer }

use crate::errors::RunnerError;
use crate::models::TaskConfig;
use crate::runner::{JobRunner, RunContext, RunOutput};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
struct HttpRequestSpec {
    url: String,
    #[serde(default)]
    method: HttpMethod,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    auth: Option<HttpAuth>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HttpAuth {
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// HttpRunner sends one HTTP request per attempt.
/// Non-2xx responses fail the attempt.
pub struct HttpRunner {
    client: Client,
}

impl HttpRunner {
    pub const NAME: &'static str = "http";

    /// The client has no request timeout of its own; the coordinator
    /// enforces the task's `timeout_seconds`.
    pub fn new() -> Result<Self, RunnerError> {
        let client = Client::builder()
            .build()
            .map_err(|e| RunnerError::failed(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn convert_method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    fn apply_auth(request: RequestBuilder, auth: &Option<HttpAuth>) -> RequestBuilder {
        match auth {
            Some(HttpAuth::Basic { username, password }) => {
                tracing::debug!(username = %username, "Applying Basic authentication");
                request.basic_auth(username, Some(password))
            }
            Some(HttpAuth::Bearer { token }) => {
                tracing::debug!("Applying Bearer token authentication");
                request.bearer_auth(token)
            }
            None => request,
        }
    }

    fn parse_spec(config: &TaskConfig) -> Result<HttpRequestSpec, RunnerError> {
        serde_json::from_value(Value::Object(config.params.clone()))
            .map_err(|e| RunnerError::failed(format!("Invalid http runner config: {}", e)))
    }

    async fn send(&self, spec: &HttpRequestSpec) -> Result<Value, RunnerError> {
        let method = Self::convert_method(spec.method);
        tracing::info!(method = %method, url = %spec.url, "Executing HTTP request");

        let mut request = self.client.request(method, &spec.url);
        for (key, value) in &spec.headers {
            request = request.header(key, value);
        }
        request = Self::apply_auth(request, &spec.auth);

        request = match &spec.body {
            Some(Value::String(text)) => request.body(text.clone()),
            Some(Value::Null) | None => request,
            Some(value) => request.json(value),
        };

        let response = request
            .send()
            .await
            .map_err(|e| RunnerError::failed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| RunnerError::failed(format!("Failed to read response body: {}", e)))?;
        tracing::info!(status = status.as_u16(), "HTTP response received");

        if !status.is_success() {
            return Err(RunnerError::failed(format!(
                "HTTP request failed with status {}: {}",
                status.as_u16(),
                response_body
            )));
        }

        let body =
            serde_json::from_str::<Value>(&response_body).unwrap_or(Value::String(response_body));

        Ok(json!({
            "status_code": status.as_u16(),
            "body": body,
        }))
    }
}

#[async_trait]
impl JobRunner for HttpRunner {
    #[tracing::instrument(skip_all, fields(execution_id = %ctx.execution_id, attempt = ctx.attempt))]
    async fn run(&self, config: &TaskConfig, ctx: RunContext) -> Result<RunOutput, RunnerError> {
        let spec = Self::parse_spec(config)?;
        ctx.checkpoint().await?;
        ctx.report(Some(&spec.url), 0, Some(1));

        let data = tokio::select! {
            _ = ctx.cancelled() => return Err(RunnerError::Terminated),
            result = self.send(&spec) => result?,
        };

        ctx.report(Some(&spec.url), 1, Some(1));
        let status_code = data["status_code"].as_u64().unwrap_or_default();
        Ok(RunOutput::new(format!("HTTP {}", status_code)).with_data(data))
    }
}
