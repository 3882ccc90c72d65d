pub mod adapter;
pub mod capability;
pub mod constraints;
pub mod error_table;
pub mod language;
pub mod media_type;
pub mod standardization;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid language tag: {0}")]
    LanguageFormat(String),
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Upstream error from {provider}: {message}")]
    Upstream { provider: String, message: String },
    #[error("Deprecated job id: {0}")]
    DeprecatedJobId(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Timeout: {0}")]
    PollTimeout(String),
    #[error("Contract violation: {0}")]
    ContractViolation(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Errors raised before any network call, because the input itself is unacceptable.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnsupportedLanguage(_))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Marker carried by a subfeature or phase name when the capability runs as a remote job.
pub const ASYNC_MARKER: &str = "async";

const PATH_SEPARATOR: &str = "__";

/// `(feature, subfeature, phase?)` part of a capability, independent of the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CapabilityPath {
    pub feature: String,
    pub subfeature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl CapabilityPath {
    pub fn new(feature: impl Into<String>, subfeature: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            subfeature: subfeature.into(),
            phase: None,
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn is_async(&self) -> bool {
        self.subfeature.contains(ASYNC_MARKER)
            || self
                .phase
                .as_deref()
                .map(|p| p.contains(ASYNC_MARKER))
                .unwrap_or(false)
    }

    /// `feature__subfeature[__phase]`, the name used for contract and sample files.
    pub fn file_stem(&self) -> String {
        match &self.phase {
            Some(phase) => format!(
                "{}{sep}{}{sep}{}",
                self.feature,
                self.subfeature,
                phase,
                sep = PATH_SEPARATOR
            ),
            None => format!("{}{}{}", self.feature, PATH_SEPARATOR, self.subfeature),
        }
    }

    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let parts: Vec<&str> = stem.split(PATH_SEPARATOR).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        match parts.as_slice() {
            [feature, subfeature] => Some(Self::new(*feature, *subfeature)),
            [feature, subfeature, phase] => Some(Self::new(*feature, *subfeature).with_phase(*phase)),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}

/// One addressable operation of one provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capability {
    pub provider: String,
    pub feature: String,
    pub subfeature: String,
    pub phase: Option<String>,
    pub is_async: bool,
}

impl Capability {
    pub fn new(provider: impl Into<String>, path: &CapabilityPath) -> Self {
        Self {
            provider: provider.into(),
            feature: path.feature.clone(),
            subfeature: path.subfeature.clone(),
            phase: path.phase.clone(),
            is_async: path.is_async(),
        }
    }

    pub fn path(&self) -> CapabilityPath {
        CapabilityPath {
            feature: self.feature.clone(),
            subfeature: self.subfeature.clone(),
            phase: self.phase.clone(),
        }
    }
}

/// Caller-supplied credential overrides for one provider (api keys, endpoints).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    values: HashMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Key/value pairs in key order, usable as a map key.
    pub fn sorted_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.sort();
        pairs
    }
}

/// Number of leading bytes kept from a local file for media-type sniffing.
pub const SNIFF_LEN: usize = 64;

/// File attached to a call: a local path or a URL, with whatever is known about its type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInput {
    pub location: String,
    pub media_type: Option<String>,
    pub header: Vec<u8>,
}

impl FileInput {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            media_type: None,
            header: Vec::new(),
        }
    }

    /// Reads the leading bytes of a local file so its type can be sniffed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = std::fs::File::open(path).map_err(|e| {
            CoreError::Validation(format!("cannot open file '{}': {e}", path.display()))
        })?;
        let mut header = vec![0u8; SNIFF_LEN];
        let read = file.read(&mut header).map_err(|e| {
            CoreError::Validation(format!("cannot read file '{}': {e}", path.display()))
        })?;
        header.truncate(read);

        Ok(Self {
            location: path.display().to_string(),
            media_type: None,
            header,
        })
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_header(mut self, header: impl Into<Vec<u8>>) -> Self {
        self.header = header.into();
        self
    }
}

/// Arguments of one invocation. Validation rewrites them in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    params: Map<String, Value>,
    file: Option<FileInput>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(params) => Ok(Self { params, file: None }),
            Value::Null => Ok(Self::new()),
            other => Err(CoreError::Validation(format!(
                "call arguments must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, file: FileInput) -> Self {
        self.file = Some(file);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.params.remove(key)
    }

    pub fn file(&self) -> Option<&FileInput> {
        self.file.as_ref()
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Fetches a required string argument.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| CoreError::Validation(format!("Missing '{key}' parameter")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Success,
    Fail,
}

/// What an adapter hands back: the untouched upstream payload and its standardized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub original_response: Value,
    pub standardized_response: Value,
}

impl ProviderResponse {
    pub fn new(original_response: Value, standardized_response: Value) -> Self {
        Self {
            original_response,
            standardized_response,
        }
    }

    pub fn from_typed<T: Serialize>(original_response: Value, standardized: &T) -> Result<Self> {
        let standardized_response = serde_json::to_value(standardized)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(Self::new(original_response, standardized_response))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedEnvelope {
    pub status: EnvelopeStatus,
    pub provider: String,
    pub original_response: Value,
    pub standardized_response: Value,
}

impl StandardizedEnvelope {
    pub fn success(provider: impl Into<String>, response: ProviderResponse) -> Self {
        Self {
            status: EnvelopeStatus::Success,
            provider: provider.into(),
            original_response: response.original_response,
            standardized_response: response.standardized_response,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncJobState {
    Pending,
    Success,
    Failed,
    DeprecatedId,
}

impl AsyncJobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncLaunchJob {
    pub provider_job_id: String,
}

impl AsyncLaunchJob {
    pub fn new(provider_job_id: impl Into<String>) -> Self {
        Self {
            provider_job_id: provider_job_id.into(),
        }
    }
}

/// One live status read of a remote job, as reported by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncJobResponse {
    pub provider_job_id: String,
    pub state: AsyncJobState,
    pub original_response: Value,
    pub standardized_response: Option<Value>,
    pub error: Option<String>,
}

impl AsyncJobResponse {
    pub fn pending(provider_job_id: impl Into<String>, original_response: Value) -> Self {
        Self {
            provider_job_id: provider_job_id.into(),
            state: AsyncJobState::Pending,
            original_response,
            standardized_response: None,
            error: None,
        }
    }

    pub fn success(provider_job_id: impl Into<String>, response: ProviderResponse) -> Self {
        Self {
            provider_job_id: provider_job_id.into(),
            state: AsyncJobState::Success,
            original_response: response.original_response,
            standardized_response: Some(response.standardized_response),
            error: None,
        }
    }

    pub fn failed(
        provider_job_id: impl Into<String>,
        error: impl Into<String>,
        original_response: Value,
    ) -> Self {
        Self {
            provider_job_id: provider_job_id.into(),
            state: AsyncJobState::Failed,
            original_response,
            standardized_response: None,
            error: Some(error.into()),
        }
    }

    pub fn deprecated(provider_job_id: impl Into<String>) -> Self {
        Self {
            provider_job_id: provider_job_id.into(),
            state: AsyncJobState::DeprecatedId,
            original_response: Value::Null,
            standardized_response: None,
            error: None,
        }
    }
}

/// Result of polling a job: still pending, or finished with a success envelope.
/// Failed and deprecated jobs surface as errors instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AsyncEnvelope {
    Pending {
        provider_job_id: String,
    },
    Terminal {
        provider_job_id: String,
        envelope: StandardizedEnvelope,
    },
}

impl AsyncEnvelope {
    pub fn provider_job_id(&self) -> &str {
        match self {
            Self::Pending { provider_job_id } | Self::Terminal { provider_job_id, .. } => {
                provider_job_id
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    pub details: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<CoreError> for ErrorResponse {
    fn from(err: CoreError) -> Self {
        let (code, message) = match &err {
            CoreError::Validation(msg) => ("VALIDATION_ERROR", msg.clone()),
            CoreError::LanguageFormat(msg) => ("LANGUAGE_FORMAT_ERROR", msg.clone()),
            CoreError::UnsupportedLanguage(msg) => ("UNSUPPORTED_LANGUAGE", msg.clone()),
            CoreError::Upstream { provider, message } => {
                let mut details = HashMap::new();
                details.insert("provider".to_string(), provider.clone());
                return ErrorResponse::new("UPSTREAM_ERROR", message.clone())
                    .with_details(details);
            }
            CoreError::DeprecatedJobId(msg) => ("DEPRECATED_JOB_ID", msg.clone()),
            CoreError::Configuration(msg) => ("CONFIGURATION_ERROR", msg.clone()),
            CoreError::PollTimeout(msg) => ("TIMEOUT", msg.clone()),
            CoreError::ContractViolation(msg) => ("CONTRACT_VIOLATION", msg.clone()),
            CoreError::Serialization(msg) => ("SERIALIZATION_ERROR", msg.clone()),
        };

        ErrorResponse::new(code, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_path_file_stem_roundtrip() {
        let plain = CapabilityPath::new("text", "chat");
        assert_eq!(plain.file_stem(), "text__chat");
        assert_eq!(CapabilityPath::from_file_stem("text__chat"), Some(plain));

        let phased = CapabilityPath::new("text", "search").with_phase("upload");
        assert_eq!(phased.to_string(), "text__search__upload");
        assert_eq!(
            CapabilityPath::from_file_stem("text__search__upload"),
            Some(phased)
        );
    }

    #[test]
    fn test_capability_path_rejects_malformed_stems() {
        assert!(CapabilityPath::from_file_stem("text").is_none());
        assert!(CapabilityPath::from_file_stem("text____chat").is_none());
        assert!(CapabilityPath::from_file_stem("a__b__c__d").is_none());
    }

    #[test]
    fn test_async_marker_detection() {
        assert!(CapabilityPath::new("audio", "speech_to_text_async").is_async());
        assert!(CapabilityPath::new("video", "tracking")
            .with_phase("launch_async")
            .is_async());
        assert!(!CapabilityPath::new("text", "chat").is_async());

        let capability = Capability::new(
            "assemblyai",
            &CapabilityPath::new("audio", "speech_to_text_async"),
        );
        assert!(capability.is_async);
        assert_eq!(capability.path().subfeature, "speech_to_text_async");
    }

    #[test]
    fn test_call_args_from_value() {
        let args = CallArgs::from_value(serde_json::json!({"text": "hello"})).unwrap();
        assert_eq!(args.get_str("text"), Some("hello"));
        assert!(CallArgs::from_value(Value::Null).unwrap().params().is_empty());
        assert!(CallArgs::from_value(serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_call_args_require_str() {
        let args = CallArgs::new().with("text", "hi");
        assert_eq!(args.require_str("text").unwrap(), "hi");
        let err = args.require_str("model").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("model"));
    }

    #[test]
    fn test_file_input_from_path_reads_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]).unwrap();

        let file = FileInput::from_path(&path).unwrap();
        assert_eq!(file.header.len(), 10);
        assert!(file.location.ends_with("pixel.png"));
    }

    #[test]
    fn test_envelope_serializes_status_lowercase() {
        let envelope = StandardizedEnvelope::success(
            "openai",
            ProviderResponse::new(serde_json::json!({"raw": 1}), serde_json::json!({"x": 1})),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["provider"], "openai");
    }

    #[test]
    fn test_async_envelope_shape() {
        let pending = AsyncEnvelope::Pending {
            provider_job_id: "job-1".to_string(),
        };
        assert!(!pending.is_terminal());
        assert_eq!(pending.provider_job_id(), "job-1");

        let value = serde_json::to_value(&pending).unwrap();
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn test_job_state_terminality() {
        assert!(!AsyncJobState::Pending.is_terminal());
        assert!(AsyncJobState::Success.is_terminal());
        assert!(AsyncJobState::Failed.is_terminal());
        assert!(AsyncJobState::DeprecatedId.is_terminal());
    }

    #[test]
    fn test_error_response_codes() {
        let response: ErrorResponse = CoreError::DeprecatedJobId("abc".to_string()).into();
        assert_eq!(response.error_code, "DEPRECATED_JOB_ID");
        assert_eq!(response.message, "abc");

        let response: ErrorResponse = CoreError::upstream("openai", "rate limited").into();
        assert_eq!(response.error_code, "UPSTREAM_ERROR");
        assert_eq!(
            response.details.unwrap().get("provider").map(String::as_str),
            Some("openai")
        );
    }

    #[test]
    fn test_validation_grouping() {
        assert!(CoreError::Validation("x".into()).is_validation());
        assert!(CoreError::UnsupportedLanguage("x".into()).is_validation());
        assert!(!CoreError::LanguageFormat("x".into()).is_validation());
        assert!(!CoreError::upstream("p", "m").is_validation());
    }
}
