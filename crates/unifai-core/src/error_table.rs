//! Provider-specific classification of upstream failures.
//!
//! Every adapter declares an ordered list of rules matching a status code or a
//! message fragment onto one of the shared error kinds. The first matching rule
//! wins; anything unmatched is an upstream error.

use crate::adapter::{Operation, ProviderError};
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Upstream,
    DeprecatedJobId,
    Configuration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    Status(u16),
    Contains(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ErrorRule {
    matcher: Matcher,
    operation: Option<Operation>,
    kind: ErrorKind,
}

impl ErrorRule {
    fn matches(&self, operation: Operation, error: &ProviderError) -> bool {
        if self.operation.map(|op| op != operation).unwrap_or(false) {
            return false;
        }
        match &self.matcher {
            Matcher::Status(status) => error.status == Some(*status),
            Matcher::Contains(needle) => error.message.to_lowercase().contains(needle),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorTable {
    rules: Vec<ErrorRule>,
}

impl ErrorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_status(mut self, status: u16, kind: ErrorKind) -> Self {
        self.rules.push(ErrorRule {
            matcher: Matcher::Status(status),
            operation: None,
            kind,
        });
        self
    }

    /// Rule that only applies to one operation, e.g. a 404 while fetching a job result.
    pub fn on_status_for(mut self, operation: Operation, status: u16, kind: ErrorKind) -> Self {
        self.rules.push(ErrorRule {
            matcher: Matcher::Status(status),
            operation: Some(operation),
            kind,
        });
        self
    }

    /// Case-insensitive substring rule.
    pub fn on_message(mut self, needle: impl Into<String>, kind: ErrorKind) -> Self {
        self.rules.push(ErrorRule {
            matcher: Matcher::Contains(needle.into().to_lowercase()),
            operation: None,
            kind,
        });
        self
    }

    pub fn kind_of(&self, operation: Operation, error: &ProviderError) -> ErrorKind {
        self.rules
            .iter()
            .find(|rule| rule.matches(operation, error))
            .map(|rule| rule.kind)
            .unwrap_or(ErrorKind::Upstream)
    }

    pub fn classify(&self, provider: &str, operation: Operation, error: ProviderError) -> CoreError {
        let message = error.to_string();
        match self.kind_of(operation, &error) {
            ErrorKind::Validation => CoreError::Validation(format!("{provider}: {message}")),
            ErrorKind::Upstream => CoreError::upstream(provider, message),
            ErrorKind::DeprecatedJobId => {
                CoreError::DeprecatedJobId(format!("{provider}: {message}"))
            }
            ErrorKind::Configuration => CoreError::Configuration(format!("{provider}: {message}")),
        }
    }
}
