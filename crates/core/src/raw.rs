use serde_json::{Map, Value as Json};

use crate::ValidationError;

fn max_spec_bytes() -> usize {
    std::env::var("TSOP_MAX_SPEC_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_048_576) // 1 MiB default
}

/// Untyped input document with a `spec` and a `config` section.
///
/// The watch-event shape `{new: {spec, config}}` is accepted as well; the
/// `new` wrapper is unwrapped transparently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSpec(Json);

impl RawSpec {
    pub fn new(value: Json) -> Self { Self(value) }

    /// Parse YAML (or JSON, which is a YAML subset).
    pub fn from_yaml_str(text: &str) -> Result<Self, ValidationError> {
        if text.len() > max_spec_bytes() {
            return Err(ValidationError::new("<document>", format!("spec too large (>{} bytes)", max_spec_bytes())));
        }
        if text.trim().is_empty() { return Ok(Self(Json::Object(Map::new()))); }
        let val: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| ValidationError::new("<document>", format!("parsing YAML: {}", e)))?;
        let json = serde_json::to_value(val)
            .map_err(|e| ValidationError::new("<document>", format!("converting YAML to JSON: {}", e)))?;
        Ok(Self(json))
    }

    pub fn as_json(&self) -> &Json { &self.0 }

    fn root(&self) -> Result<Option<&Map<String, Json>>, ValidationError> {
        match &self.0 {
            Json::Null => Ok(None),
            Json::Object(m) => match m.get("new") {
                Some(Json::Object(inner)) => Ok(Some(inner)),
                Some(Json::Null) | None => Ok(Some(m)),
                Some(_) => Err(ValidationError::wrong_type("new", "a mapping")),
            },
            _ => Err(ValidationError::wrong_type("<document>", "a mapping")),
        }
    }

    fn section(&self, name: &str) -> Result<Option<&Map<String, Json>>, ValidationError> {
        let Some(root) = self.root()? else { return Ok(None) };
        match root.get(name) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::Object(m)) => Ok(Some(m)),
            Some(_) => Err(ValidationError::wrong_type(name, "a mapping")),
        }
    }

    /// Deployment topology section (`spec`).
    pub fn spec(&self) -> Result<Option<&Map<String, Json>>, ValidationError> { self.section("spec") }

    /// Sensitive/runtime section (`config`).
    pub fn config(&self) -> Result<Option<&Map<String, Json>>, ValidationError> { self.section("config") }
}

impl From<Json> for RawSpec {
    fn from(v: Json) -> Self { Self(v) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_watch_event_shape() {
        let raw = RawSpec::new(serde_json::json!({"new": {"spec": {"replicas": 1}}}));
        assert_eq!(raw.spec().unwrap().unwrap().get("replicas"), Some(&serde_json::json!(1)));
        assert!(raw.config().unwrap().is_none());
    }

    #[test]
    fn rejects_non_mapping_sections() {
        let raw = RawSpec::new(serde_json::json!({"spec": [1, 2]}));
        let err = raw.spec().unwrap_err();
        assert_eq!(err.field, "spec");
    }

    #[test]
    fn empty_text_is_an_empty_document() {
        let raw = RawSpec::from_yaml_str("  \n").unwrap();
        assert!(raw.spec().unwrap().is_none());
    }

    #[test]
    fn yaml_errors_are_friendly() {
        let err = RawSpec::from_yaml_str("spec: [unclosed").unwrap_err();
        assert!(err.reason.contains("parsing YAML"), "err={}", err);
    }

    #[test]
    fn default_size_cap_is_one_mebibyte() {
        if std::env::var_os("TSOP_MAX_SPEC_BYTES").is_some() {
            return;
        }
        assert_eq!(max_spec_bytes(), 1024 * 1024);
        // A comment pads the document without changing its content.
        let mut text = String::from("spec: {}\n#");
        text.push_str(&"x".repeat(1024 * 1024 - text.len()));
        assert!(RawSpec::from_yaml_str(&text).is_ok());
        text.push('x');
        let err = RawSpec::from_yaml_str(&text).unwrap_err();
        assert!(err.reason.contains("too large"), "err={}", err);
    }
}
