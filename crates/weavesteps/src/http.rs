use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use weavecore::{Capability, StepContext, StepError, Value};
use weaveruntime::{CapabilityFactory, CapabilityMetadata};

/// HTTP request capability.
///
/// The URL comes from config or from the input (a string, or an object with
/// `url` and optional `body`). Connection errors and 5xx responses are retried
/// within the step's retry budget; the whole exchange runs under the step
/// timeout.
pub struct HttpRequest {
    client: reqwest::Client,
    method: reqwest::Method,
    url: Option<String>,
    headers: HashMap<String, String>,
    retry_delay: Duration,
}

impl HttpRequest {
    pub fn new(method: reqwest::Method, url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            method,
            url,
            headers: HashMap::new(),
            retry_delay: Duration::from_millis(100),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn target(&self, input: &Value) -> Result<(String, Option<Value>), StepError> {
        let from_input = match input {
            Value::String(url) => Some(url.clone()),
            Value::Object(_) => input.get_path("url").and_then(|v| v.as_str()).map(str::to_string),
            _ => None,
        };
        let url = self
            .url
            .clone()
            .or(from_input)
            .ok_or_else(|| StepError::Configuration("http.request needs a url".to_string()))?;

        let body = match input {
            Value::Object(_) => input.get_path("body").cloned(),
            _ => None,
        };
        Ok((url, body))
    }

    async fn attempt(
        &self,
        ctx: &StepContext<'_>,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, Attempt> {
        let mut request = self.client.request(self.method.clone(), url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(timeout) = ctx.timeout() {
            request = request.timeout(timeout);
        }
        if let Some(body) = body {
            request = match body {
                Value::String(text) => request.body(text.clone()),
                other => request.json(&other.to_json()),
            };
        }

        let response = request.send().await.map_err(|e| {
            let message = format!("HTTP request failed: {}", e);
            if e.is_timeout() || e.is_connect() {
                Attempt::Retry(message)
            } else {
                Attempt::Fatal(message)
            }
        })?;

        let status = response.status();
        let headers: HashMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.to_str().unwrap_or(""))))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| Attempt::Fatal(format!("Failed to read response: {}", e)))?;

        if status.is_server_error() {
            return Err(Attempt::Retry(format!("Server responded {}", status)));
        }

        let body = serde_json::from_str::<serde_json::Value>(&text)
            .map(Value::from)
            .unwrap_or(Value::String(text));

        Ok(Value::object([
            ("status", Value::from(status.as_u16() as i64)),
            ("headers", Value::Object(headers)),
            ("body", body),
        ]))
    }
}

enum Attempt {
    Retry(String),
    Fatal(String),
}

#[async_trait]
impl Capability for HttpRequest {
    async fn invoke(&self, ctx: &StepContext<'_>, input: Value) -> Result<Value, StepError> {
        let (url, body) = self.target(&input)?;
        ctx.events.info(format!("{} {}", self.method, url));

        ctx.within_timeout(async {
            loop {
                match self.attempt(ctx, &url, body.as_ref()).await {
                    Ok(response) => {
                        ctx.events.info(format!(
                            "Response status: {}",
                            response.get_path("status").and_then(|s| s.as_f64()).unwrap_or(0.0)
                        ));
                        return Ok(response);
                    }
                    Err(Attempt::Fatal(message)) => return Err(StepError::Capability(message)),
                    Err(Attempt::Retry(message)) => {
                        if ctx.is_cancelled() || !ctx.record_retry() {
                            return Err(StepError::Capability(message));
                        }
                        ctx.events.warn(format!(
                            "{}; retry {}/{}",
                            message,
                            ctx.retries_used(),
                            ctx.retry_budget()
                        ));
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        })
        .await
    }
}

pub struct HttpRequestFactory;

impl CapabilityFactory for HttpRequestFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn Capability>, StepError> {
        let method_name = config
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_uppercase();
        let method = match method_name.as_str() {
            "GET" => reqwest::Method::GET,
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "PATCH" => reqwest::Method::PATCH,
            "DELETE" => reqwest::Method::DELETE,
            other => {
                return Err(StepError::Configuration(format!(
                    "Unsupported method: {}",
                    other
                )))
            }
        };

        let url = config.get("url").and_then(|v| v.as_str()).map(str::to_string);
        let mut capability = HttpRequest::new(method, url);

        if let Some(Value::Object(headers)) = config.get("headers") {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    capability = capability.with_header(key.clone(), value);
                }
            }
        }
        if let Some(ms) = config.get("retry_delay_ms").and_then(|v| v.as_f64()) {
            capability = capability.with_retry_delay(Duration::from_millis(ms.max(0.0) as u64));
        }

        Ok(Arc::new(capability))
    }

    fn name(&self) -> &str {
        "http.request"
    }

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new("http", "Make HTTP requests")
    }
}
