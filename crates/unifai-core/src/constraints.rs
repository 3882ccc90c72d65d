//! Declarative per-capability input constraints.
//!
//! Constraint documents are JSON files, one per provider:
//!
//! ```json
//! {
//!   "provider": "openai",
//!   "capabilities": [
//!     { "feature": "text", "subfeature": "chat", "models": ["gpt-4o"], "default_model": "gpt-4o" }
//!   ]
//! }
//! ```

use crate::language::validate_language;
use crate::{media_type, CallArgs, CapabilityPath, CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    #[serde(default)]
    pub allow_null_language: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConstraints {
    #[serde(flatten)]
    pub path: CapabilityPath,
    #[serde(flatten)]
    pub constraints: ConstraintSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintDocument {
    pub provider: String,
    #[serde(default)]
    pub capabilities: Vec<CapabilityConstraints>,
}

/// Checks the attached file, if any, against `file_types`.
/// Files whose type cannot be detected pass unchecked.
pub fn validate_file_type(constraints: &ConstraintSet, args: &CallArgs) -> Result<()> {
    let (Some(allowed), Some(file)) = (&constraints.file_types, args.file()) else {
        return Ok(());
    };
    let Some(detected) = media_type::detect(file) else {
        debug!(location = %file.location, "Media type undetected, skipping file type check");
        return Ok(());
    };

    if allowed.iter().any(|pattern| media_type::matches(pattern, &detected)) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "file type {detected} is not supported, supported types: {}",
            allowed.join(", ")
        )))
    }
}

/// Fills in `default_model` when `model` is absent and rejects unknown models.
pub fn validate_model(constraints: &ConstraintSet, args: &mut CallArgs, provider: &str) -> Result<()> {
    let requested = args.get("model").filter(|v| !v.is_null()).cloned();

    match requested {
        None => {
            if let Some(default) = &constraints.default_model {
                args.set("model", default.clone());
            }
            Ok(())
        }
        Some(value) => {
            let model = value.as_str().ok_or_else(|| {
                CoreError::Validation(format!("model must be a string, got {value}"))
            })?;
            match &constraints.models {
                Some(models) if !models.iter().any(|m| m == model) => {
                    Err(CoreError::Validation(format!(
                        "model '{model}' is not available for provider '{provider}', available models: {}",
                        models.join(", ")
                    )))
                }
                _ => Ok(()),
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConstraintStore {
    entries: HashMap<(String, CapabilityPath), ConstraintSet>,
}

impl ConstraintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider: impl Into<String>, path: CapabilityPath, set: ConstraintSet) {
        self.entries.insert((provider.into(), path), set);
    }

    pub fn get(&self, provider: &str, path: &CapabilityPath) -> Option<&ConstraintSet> {
        self.entries.get(&(provider.to_string(), path.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load_document(&mut self, document: ConstraintDocument) {
        for entry in document.capabilities {
            self.insert(document.provider.clone(), entry.path, entry.constraints);
        }
    }

    pub fn load_json(&mut self, json: &str) -> Result<()> {
        let document: ConstraintDocument = serde_json::from_str(json)
            .map_err(|e| CoreError::Configuration(format!("invalid constraint document: {e}")))?;
        self.load_document(document);
        Ok(())
    }

    /// Loads every `*.json` document in `dir`. A missing directory loads nothing.
    pub fn load_dir(&mut self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        let entries = std::fs::read_dir(dir).map_err(|e| {
            CoreError::Configuration(format!("cannot read {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let path = entry
                .map_err(|e| CoreError::Configuration(e.to_string()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = std::fs::read_to_string(&path).map_err(|e| {
                CoreError::Configuration(format!("cannot read {}: {e}", path.display()))
            })?;
            self.load_json(&json).map_err(|e| {
                CoreError::Configuration(format!("{}: {e}", path.display()))
            })?;
        }

        info!(dir = %dir.display(), entries = self.len(), "Loaded constraints");
        Ok(())
    }

    /// Runs file type, language and model checks in that order, rewriting `args`.
    pub fn validate(&self, provider: &str, path: &CapabilityPath, args: &mut CallArgs) -> Result<()> {
        let Some(constraints) = self.get(provider, path) else {
            return Ok(());
        };
        validate_file_type(constraints, args)?;
        validate_language(constraints, args, provider, path)?;
        validate_model(constraints, args, provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileInput;

    fn image_constraints() -> ConstraintSet {
        ConstraintSet {
            file_types: Some(vec!["image/png".to_string(), "image/jpeg".to_string()]),
            ..ConstraintSet::default()
        }
    }

    #[test]
    fn test_file_type_mismatch_is_validation_error() {
        let args = CallArgs::new().with_file(FileInput::new("cat.gif"));
        let err = validate_file_type(&image_constraints(), &args).unwrap_err();
        assert!(err.is_validation());
        let message = err.to_string();
        assert!(message.contains("image/gif"));
        assert!(message.contains("image/png, image/jpeg"));
    }

    #[test]
    fn test_file_type_match_passes_unchanged() {
        let args = CallArgs::new().with_file(FileInput::new("cat.png"));
        let before = args.clone();
        validate_file_type(&image_constraints(), &args).unwrap();
        assert_eq!(args, before);
    }

    #[test]
    fn test_wildcard_and_undetected_files_pass() {
        let wildcard = ConstraintSet {
            file_types: Some(vec!["image/*".to_string()]),
            ..ConstraintSet::default()
        };
        let gif = CallArgs::new().with_file(FileInput::new("cat.gif"));
        assert!(validate_file_type(&wildcard, &gif).is_ok());

        let unknown = CallArgs::new().with_file(FileInput::new("blob"));
        assert!(validate_file_type(&image_constraints(), &unknown).is_ok());
    }

    #[test]
    fn test_model_default_and_rejection() {
        let constraints = ConstraintSet {
            models: Some(vec!["small".to_string(), "large".to_string()]),
            default_model: Some("small".to_string()),
            ..ConstraintSet::default()
        };

        let mut args = CallArgs::new();
        validate_model(&constraints, &mut args, "p").unwrap();
        assert_eq!(args.get_str("model"), Some("small"));

        let mut args = CallArgs::new().with("model", "large");
        validate_model(&constraints, &mut args, "p").unwrap();
        assert_eq!(args.get_str("model"), Some("large"));

        let mut args = CallArgs::new().with("model", "huge");
        assert!(validate_model(&constraints, &mut args, "p").unwrap_err().is_validation());
    }

    #[test]
    fn test_store_loads_document_with_phases() {
        let mut store = ConstraintStore::new();
        store
            .load_json(
                r#"{
                    "provider": "local",
                    "capabilities": [
                        {"feature": "text", "subfeature": "search", "phase": "upload", "languages": ["en"]},
                        {"feature": "image", "subfeature": "tagging", "file_types": ["image/*"]}
                    ]
                }"#,
            )
            .unwrap();

        assert_eq!(store.len(), 2);
        let upload = CapabilityPath::new("text", "search").with_phase("upload");
        assert_eq!(
            store.get("local", &upload).unwrap().languages,
            Some(vec!["en".to_string()])
        );
        assert!(store
            .get("local", &CapabilityPath::new("text", "search"))
            .is_none());
    }

    #[test]
    fn test_store_validate_runs_all_checks() {
        let mut store = ConstraintStore::new();
        let path = CapabilityPath::new("image", "tagging");
        store.insert(
            "p",
            path.clone(),
            ConstraintSet {
                languages: Some(vec!["en".to_string(), "fr".to_string()]),
                ..image_constraints()
            },
        );

        let mut args = CallArgs::new()
            .with("language", "FR-fr")
            .with_file(FileInput::new("cat.png"));
        store.validate("p", &path, &mut args).unwrap();
        assert_eq!(args.get_str("language"), Some("fr"));

        let mut args = CallArgs::new()
            .with("language", "fr")
            .with_file(FileInput::new("cat.gif"));
        assert!(store.validate("p", &path, &mut args).is_err());

        let mut untouched = CallArgs::new().with("language", "xx--");
        store
            .validate("other", &path, &mut untouched)
            .unwrap();
    }

    #[test]
    fn test_invalid_document_is_configuration_error() {
        let mut store = ConstraintStore::new();
        assert!(matches!(
            store.load_json("{\"capabilities\": 3}"),
            Err(CoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_dir_skips_missing_directory() {
        let mut store = ConstraintStore::new();
        store
            .load_dir(Path::new("/definitely/not/a/real/dir"))
            .unwrap();
        assert!(store.is_empty());
    }
}
