use crate::features::http_transport::repo::{HttpRequest, HttpTransportRepository};
use futures::stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use tracing::debug;
use unifai_core::adapter::{ProviderChunkStream, ProviderError, ProviderResult};

const SSE_DATA_PREFIX: &str = "data:";
const SSE_DONE: &str = "[DONE]";

/// JSON API client for one provider: base URL, fixed headers, and status handling.
pub struct JsonHttpService {
    repo: Arc<dyn HttpTransportRepository>,
    base_url: String,
    headers: HashMap<String, String>,
    timeout_ms: Option<u64>,
}

impl JsonHttpService {
    pub fn new(repo: Arc<dyn HttpTransportRepository>, base_url: impl Into<String>) -> Self {
        Self {
            repo,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headers: HashMap::new(),
            timeout_ms: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: &str, path: &str, body: Option<Value>) -> HttpRequest {
        HttpRequest {
            method: method.to_string(),
            url: format!("{}/{}", self.base_url, path.trim_start_matches('/')),
            headers: self.headers.clone(),
            body,
            timeout_ms: self.timeout_ms,
        }
    }

    fn send(&self, request: HttpRequest) -> ProviderResult<Value> {
        debug!(method = %request.method, url = %request.url, "Sending provider request");
        let response = self.repo.execute(&request)?;

        if !response.is_success() {
            return Err(ProviderError::with_status(
                response.status,
                error_message(&response.body),
            ));
        }
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|e| {
            ProviderError::with_status(
                response.status,
                format!("malformed JSON in provider response: {e}"),
            )
        })
    }

    pub fn get_json(&self, path: &str) -> ProviderResult<Value> {
        self.send(self.request("GET", path, None))
    }

    pub fn post_json(&self, path: &str, body: Value) -> ProviderResult<Value> {
        self.send(self.request("POST", path, Some(body)))
    }

    /// Posts `body` and yields the JSON payload of each server-sent event until `[DONE]`.
    pub fn post_event_stream(&self, path: &str, body: Value) -> ProviderResult<ProviderChunkStream> {
        let request = self.request("POST", path, Some(body));
        debug!(url = %request.url, "Opening provider event stream");
        let reader = self
            .repo
            .open_stream(&request)
            .map_err(|e| match ProviderError::from(e) {
                ProviderError {
                    status: Some(status),
                    message,
                } => ProviderError::with_status(status, error_message(&message)),
                other => other,
            })?;
        Ok(Box::pin(stream::iter(SseEvents::new(reader))))
    }
}

/// Best-effort extraction of the provider's own error text from a failure body.
pub fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("error"))
                .or_else(|| v.get("message"))
                .or_else(|| v.get("detail"))
        })
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Deserializes a field of an upstream payload, reporting malformed payloads as upstream errors.
pub fn decode<T: DeserializeOwned>(value: &Value) -> ProviderResult<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| ProviderError::new(format!("unexpected provider payload: {e}")))
}

struct SseEvents<R> {
    reader: R,
    done: bool,
}

impl<R: BufRead> SseEvents<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for SseEvents<R> {
    type Item = ProviderResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    let Some(data) = line.trim().strip_prefix(SSE_DATA_PREFIX) else {
                        continue;
                    };
                    let data = data.trim();
                    if data == SSE_DONE {
                        self.done = true;
                        return None;
                    }
                    return Some(serde_json::from_str(data).map_err(|e| {
                        ProviderError::new(format!("malformed stream event: {e}"))
                    }));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(ProviderError::new(format!("stream interrupted: {e}"))));
                }
            }
        }
        None
    }
}
