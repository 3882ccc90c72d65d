//! Language tag resolution against a provider's accepted codes.
//!
//! A tag is split on `-` or `_` into subtags. Malformed tags are a
//! [`CoreError::LanguageFormat`]; well-formed tags the provider does not accept
//! are a [`CoreError::UnsupportedLanguage`].

use crate::constraints::ConstraintSet;
use crate::{CallArgs, CapabilityPath, CoreError, Result};
use serde_json::Value;
use tracing::debug;

const SOURCE_FIELDS: [&str; 2] = ["language", "source_language"];
const TARGET_FIELD: &str = "target_language";
const AUTO: &str = "auto";
const MAX_SUBTAG_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageTag {
    subtags: Vec<String>,
}

impl LanguageTag {
    pub fn parse(tag: &str) -> Result<Self> {
        let trimmed = tag.trim();
        let subtags: Vec<&str> = trimmed.split(['-', '_']).collect();

        let well_formed = !trimmed.is_empty()
            && subtags.iter().all(|s| {
                !s.is_empty()
                    && s.len() <= MAX_SUBTAG_LEN
                    && s.chars().all(|c| c.is_ascii_alphanumeric())
            })
            && (2..=3).contains(&subtags[0].len())
            && subtags[0].chars().all(|c| c.is_ascii_alphabetic());

        if !well_formed {
            return Err(CoreError::LanguageFormat(format!("'{tag}'")));
        }

        Ok(Self {
            subtags: subtags.iter().map(|s| s.to_ascii_lowercase()).collect(),
        })
    }

    pub fn primary(&self) -> &str {
        &self.subtags[0]
    }

    pub fn is_bare(&self) -> bool {
        self.subtags.len() == 1
    }

    /// The tag itself, then each shorter prefix down to the primary subtag.
    pub fn candidates(&self) -> impl Iterator<Item = String> + '_ {
        (1..=self.subtags.len())
            .rev()
            .map(move |n| self.subtags[..n].join("-"))
    }
}

/// Normalizes a tag into the lowercase `-`-joined form used for comparison.
fn comparable(code: &str) -> String {
    code.trim().replace('_', "-").to_ascii_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct LanguageNormalizer {
    accepted: Vec<String>,
}

impl LanguageNormalizer {
    pub fn new<I, S>(accepted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted: accepted.into_iter().map(Into::into).collect(),
        }
    }

    fn lookup(&self, candidate: &str) -> Option<&str> {
        self.accepted
            .iter()
            .find(|code| comparable(code) == candidate)
            .map(String::as_str)
    }

    /// Regional variant for a bare language: `xx-XX` when listed, else the first one listed.
    fn regional(&self, primary: &str) -> Option<&str> {
        let prefix = format!("{primary}-");
        let mut variants = self
            .accepted
            .iter()
            .filter(|code| comparable(code).starts_with(&prefix));

        let first = variants.clone().next()?;
        let home = format!("{primary}-{primary}");
        Some(
            variants
                .find(|code| comparable(code) == home)
                .unwrap_or(first)
                .as_str(),
        )
    }

    /// Resolves `tag` to an accepted code. `Ok(None)` means well-formed but unsupported.
    pub fn resolve(&self, tag: &str) -> Result<Option<String>> {
        let parsed = LanguageTag::parse(tag)?;

        if let Some(code) = parsed.candidates().find_map(|c| self.lookup(&c)) {
            return Ok(Some(code.to_string()));
        }
        if parsed.is_bare() {
            return Ok(self.regional(parsed.primary()).map(str::to_string));
        }
        Ok(None)
    }
}

fn is_null_language(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty() || s.eq_ignore_ascii_case(AUTO),
        Some(_) => false,
    }
}

fn tag_of<'a>(field: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| CoreError::LanguageFormat(format!("{field} must be a string, got {value}")))
}

/// Resolves the language arguments of a call and rewrites them to accepted codes.
///
/// `language` (or `source_language`) may be null or `auto` only when the
/// constraints allow it. `target_language` is checked when present.
pub fn validate_language(
    constraints: &ConstraintSet,
    args: &mut CallArgs,
    provider: &str,
    path: &CapabilityPath,
) -> Result<()> {
    let Some(languages) = &constraints.languages else {
        return Ok(());
    };
    let normalizer = LanguageNormalizer::new(languages.iter().cloned());

    let field = SOURCE_FIELDS
        .iter()
        .copied()
        .find(|f| args.contains(f))
        .unwrap_or(SOURCE_FIELDS[0]);

    if is_null_language(args.get(field)) {
        if !constraints.allow_null_language {
            return Err(CoreError::UnsupportedLanguage(format!(
                "provider '{provider}' requires an explicit {field} for {path}"
            )));
        }
        if args.contains(field) {
            args.set(field, Value::Null);
        }
    } else {
        rewrite(&normalizer, args, field, provider, path)?;
    }

    match args.get(TARGET_FIELD) {
        None | Some(Value::Null) => {}
        Some(value) if is_null_language(Some(value)) => {
            return Err(CoreError::UnsupportedLanguage(format!(
                "provider '{provider}' requires an explicit {TARGET_FIELD} for {path}"
            )));
        }
        Some(_) => rewrite(&normalizer, args, TARGET_FIELD, provider, path)?,
    }

    Ok(())
}

fn rewrite(
    normalizer: &LanguageNormalizer,
    args: &mut CallArgs,
    field: &str,
    provider: &str,
    path: &CapabilityPath,
) -> Result<()> {
    let Some(value) = args.get(field) else {
        return Ok(());
    };
    let tag = tag_of(field, value)?.to_string();

    match normalizer.resolve(&tag)? {
        Some(code) => {
            if code != tag {
                debug!(provider = %provider, capability = %path, field, from = %tag, to = %code, "Rewrote language");
            }
            args.set(field, code);
            Ok(())
        }
        None => Err(CoreError::UnsupportedLanguage(format!(
            "'{tag}' is not supported by provider '{provider}' for {path}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn constraints(languages: &[&str], allow_null_language: bool) -> ConstraintSet {
        ConstraintSet {
            languages: Some(languages.iter().map(|s| s.to_string()).collect()),
            allow_null_language,
            ..ConstraintSet::default()
        }
    }

    fn path() -> CapabilityPath {
        CapabilityPath::new("translation", "automatic_translation")
    }

    #[test]
    fn test_over_qualified_tag_is_stripped() {
        let normalizer = LanguageNormalizer::new(["en", "fr"]);
        assert_eq!(normalizer.resolve("EN-us-Latn").unwrap(), Some("en".to_string()));
        assert_eq!(normalizer.resolve("fr_CA").unwrap(), Some("fr".to_string()));
    }

    #[test]
    fn test_exact_match_keeps_provider_spelling() {
        let normalizer = LanguageNormalizer::new(["en-US", "pt-BR"]);
        assert_eq!(normalizer.resolve("pt-br").unwrap(), Some("pt-BR".to_string()));
    }

    #[test]
    fn test_unsupported_tag_resolves_to_none() {
        let normalizer = LanguageNormalizer::new(["en", "fr"]);
        assert_eq!(normalizer.resolve("zz").unwrap(), None);
        assert_eq!(normalizer.resolve("de-DE").unwrap(), None);
    }

    #[test]
    fn test_malformed_tags_are_format_errors() {
        let normalizer = LanguageNormalizer::new(["en"]);
        for tag in ["xx--", "", "e", "english", "en-toolongsubtag", "12", "en-$"] {
            assert!(
                matches!(normalizer.resolve(tag), Err(CoreError::LanguageFormat(_))),
                "{tag} should be malformed"
            );
        }
    }

    #[test]
    fn test_bare_language_falls_back_to_region() {
        let normalizer = LanguageNormalizer::new(["fr-CA", "fr-FR", "en-GB", "en-AU"]);
        assert_eq!(normalizer.resolve("fr").unwrap(), Some("fr-FR".to_string()));
        assert_eq!(normalizer.resolve("en").unwrap(), Some("en-GB".to_string()));
        assert_eq!(normalizer.resolve("es").unwrap(), None);
    }

    #[test]
    fn test_validate_rewrites_in_place() {
        let mut args = CallArgs::new().with("language", "EN-us-Latn");
        validate_language(&constraints(&["en", "fr"], false), &mut args, "p", &path()).unwrap();
        assert_eq!(args.get_str("language"), Some("en"));
    }

    #[test]
    fn test_validate_unsupported_names_tag_and_provider() {
        let mut args = CallArgs::new().with("language", "zz");
        let err = validate_language(&constraints(&["en", "fr"], false), &mut args, "deepl", &path())
            .unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedLanguage(_)));
        let message = err.to_string();
        assert!(message.contains("zz") && message.contains("deepl"));
    }

    #[test]
    fn test_validate_malformed_before_support_check() {
        let mut args = CallArgs::new().with("language", "xx--");
        let err = validate_language(&constraints(&["en"], false), &mut args, "p", &path())
            .unwrap_err();
        assert!(matches!(err, CoreError::LanguageFormat(_)));
    }

    #[test]
    fn test_null_language_requires_permission() {
        let strict = constraints(&["en"], false);
        let lenient = constraints(&["en"], true);

        let mut args = CallArgs::new().with("language", "auto");
        assert!(matches!(
            validate_language(&strict, &mut args, "p", &path()),
            Err(CoreError::UnsupportedLanguage(_))
        ));

        let mut args = CallArgs::new();
        assert!(validate_language(&strict, &mut args, "p", &path()).is_err());

        let mut args = CallArgs::new().with("language", "auto");
        validate_language(&lenient, &mut args, "p", &path()).unwrap();
        assert_eq!(args.get("language"), Some(&Value::Null));
    }

    #[test]
    fn test_source_and_target_language() {
        let mut args = CallArgs::new()
            .with("source_language", "fr-FR")
            .with("target_language", "EN_us");
        validate_language(&constraints(&["en", "fr"], false), &mut args, "p", &path()).unwrap();
        assert_eq!(args.get_str("source_language"), Some("fr"));
        assert_eq!(args.get_str("target_language"), Some("en"));

        let mut args = CallArgs::new()
            .with("source_language", "fr")
            .with("target_language", "auto");
        assert!(validate_language(&constraints(&["en", "fr"], true), &mut args, "p", &path())
            .is_err());
    }

    #[test]
    fn test_no_language_constraint_is_noop() {
        let mut args = CallArgs::new().with("language", "xx--");
        validate_language(&ConstraintSet::default(), &mut args, "p", &path()).unwrap();
        assert_eq!(args.get_str("language"), Some("xx--"));
    }

    mod property_tests {
        use super::*;

        fn subtag() -> impl Strategy<Value = String> {
            "[a-zA-Z0-9]{1,8}"
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn property_qualified_tag_resolves_to_accepted_primary(
                primary in "[a-z]{2,3}",
                rest in prop::collection::vec(subtag(), 0..3),
                upper in any::<bool>(),
            ) {
                let normalizer = LanguageNormalizer::new([primary.clone()]);
                let mut tag = if upper { primary.to_uppercase() } else { primary.clone() };
                for s in &rest {
                    tag.push('-');
                    tag.push_str(s);
                }
                prop_assert_eq!(normalizer.resolve(&tag).unwrap(), Some(primary));
            }

            #[test]
            fn property_empty_subtag_is_always_a_format_error(
                primary in "[a-z]{2,3}",
                tail in "[-_]{2,4}",
            ) {
                let normalizer = LanguageNormalizer::new(["en"]);
                let tag = format!("{primary}{tail}");
                prop_assert!(matches!(
                    normalizer.resolve(&tag),
                    Err(CoreError::LanguageFormat(_))
                ));
            }
        }
    }
}
