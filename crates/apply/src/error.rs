use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tsop_core::ValidationError;
use tsop_kubehub::ClientError;
use tsop_render::TemplateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verb {
    Create,
    Apply,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::Create => "create",
            Verb::Apply => "apply",
        })
    }
}

/// A client failure with the object it happened on.
#[derive(Debug, Clone, Error)]
#[error("{kind} apply failed: {source}")]
pub struct PlatformApiError {
    pub kind: &'static str,
    pub op: Verb,
    pub namespace: String,
    pub name: String,
    pub source: ClientError,
}

impl PlatformApiError {
    pub fn is_transient(&self) -> bool { self.source.is_transient() }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Apply(#[from] PlatformApiError),
}

impl ReconcileError {
    /// Short label for logs and metrics.
    pub fn class(&self) -> &'static str {
        match self {
            ReconcileError::Validation(_) => "validation",
            ReconcileError::Template(_) => "template",
            ReconcileError::Apply(e) if e.is_transient() => "apply_transient",
            ReconcileError::Apply(_) => "apply",
        }
    }
}
