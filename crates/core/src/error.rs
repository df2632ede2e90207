use thiserror::Error;

/// Malformed input spec. `field` is the dotted path of the offending key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid spec: {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { field: field.into(), reason: reason.into() }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "required field is missing")
    }

    pub fn wrong_type(field: impl Into<String>, expected: &str) -> Self {
        Self::new(field, format!("expected {}", expected))
    }
}
