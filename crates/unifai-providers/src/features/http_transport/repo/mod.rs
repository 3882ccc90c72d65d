use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::time::Duration;
use thiserror::Error;
use unifai_core::adapter::ProviderError;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub timeout_ms: Option<u64>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout_ms: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request failed: {0}")]
    Send(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<TransportError> for ProviderError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Status { status, body } => ProviderError::with_status(status, body),
            other => ProviderError::new(other.to_string()),
        }
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Body of a streaming response, read line by line as it arrives.
pub type LineReader = Box<dyn BufRead + Send>;

#[cfg_attr(test, mockall::automock)]
pub trait HttpTransportRepository: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> TransportResult<HttpResponse>;

    /// Sends the request and hands back the open body. Non-2xx answers are read fully
    /// and returned as [`TransportError::Status`].
    fn open_stream(&self, request: &HttpRequest) -> TransportResult<LineReader>;
}

pub struct ReqwestHttpTransport {
    client: Client,
}

impl ReqwestHttpTransport {
    pub fn new() -> TransportResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }

    fn send(&self, request: &HttpRequest) -> TransportResult<reqwest::blocking::Response> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("invalid HTTP method: {e}")))?;

        let mut headers = HeaderMap::new();
        for (key, value) in &request.headers {
            let key = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                TransportError::InvalidRequest(format!("invalid header name '{key}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                TransportError::InvalidRequest(format!("invalid header value for '{key}': {e}"))
            })?;
            headers.insert(key, value);
        }

        let mut builder = self.client.request(method, &request.url).headers(headers);
        if let Some(timeout) = request.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        builder
            .send()
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

impl HttpTransportRepository for ReqwestHttpTransport {
    fn execute(&self, request: &HttpRequest) -> TransportResult<HttpResponse> {
        let response = self.send(request)?;
        let status = response.status().as_u16();

        let mut response_headers = HashMap::new();
        for (k, v) in response.headers() {
            response_headers.insert(k.to_string(), v.to_str().unwrap_or_default().to_string());
        }

        let body = response
            .text()
            .map_err(|e| TransportError::Body(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers: response_headers,
            body,
        })
    }

    fn open_stream(&self, request: &HttpRequest) -> TransportResult<LineReader> {
        let response = self.send(request)?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .map_err(|e| TransportError::Body(e.to_string()))?;
            return Err(TransportError::Status { status, body });
        }
        Ok(Box::new(BufReader::new(response)))
    }
}
