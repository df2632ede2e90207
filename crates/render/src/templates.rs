//! Base templates: one versioned descriptor per object, embedded at build time
//! and optionally overridden from a directory with the same file names.

use std::path::{Path, PathBuf};

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Service};
use k8s_openapi::api::networking::v1::Ingress;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

/// Bumped whenever an embedded template changes shape.
pub const TEMPLATE_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("reading template {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("parsing template {template}: {reason}")]
    Parse { template: &'static str, reason: String },
    #[error("template {template} has unexpected shape: {reason}")]
    Shape { template: &'static str, reason: String },
}

impl TemplateError {
    pub(crate) fn shape(template: &'static str, reason: impl Into<String>) -> Self {
        TemplateError::Shape { template, reason: reason.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Namespace,
    StatefulSet,
    ConfigMap,
    Service,
    HeadlessService,
    Ingress,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 6] = [
        TemplateKind::Namespace,
        TemplateKind::StatefulSet,
        TemplateKind::ConfigMap,
        TemplateKind::Service,
        TemplateKind::HeadlessService,
        TemplateKind::Ingress,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            TemplateKind::Namespace => "namespace.yaml",
            TemplateKind::StatefulSet => "statefulset.yaml",
            TemplateKind::ConfigMap => "configmap.yaml",
            TemplateKind::Service => "service.yaml",
            TemplateKind::HeadlessService => "headless-service.yaml",
            TemplateKind::Ingress => "ingress.yaml",
        }
    }

    fn embedded(self) -> &'static str {
        match self {
            TemplateKind::Namespace => include_str!("../templates/namespace.yaml"),
            TemplateKind::StatefulSet => include_str!("../templates/statefulset.yaml"),
            TemplateKind::ConfigMap => include_str!("../templates/configmap.yaml"),
            TemplateKind::Service => include_str!("../templates/service.yaml"),
            TemplateKind::HeadlessService => include_str!("../templates/headless-service.yaml"),
            TemplateKind::Ingress => include_str!("../templates/ingress.yaml"),
        }
    }
}

/// Source of raw template text.
pub trait TemplateStore: Send + Sync {
    fn source(&self, kind: TemplateKind) -> Result<String, TemplateError>;
}

/// Templates compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedTemplates;

impl TemplateStore for EmbeddedTemplates {
    fn source(&self, kind: TemplateKind) -> Result<String, TemplateError> { Ok(kind.embedded().to_string()) }
}

/// Templates read from a directory; files that are absent fall back to the embedded copy.
#[derive(Debug, Clone)]
pub struct DirTemplates {
    dir: PathBuf,
}

impl DirTemplates {
    pub fn new(dir: impl AsRef<Path>) -> Self { Self { dir: dir.as_ref().to_path_buf() } }
}

impl TemplateStore for DirTemplates {
    fn source(&self, kind: TemplateKind) -> Result<String, TemplateError> {
        let path = self.dir.join(kind.file_name());
        if !path.exists() {
            debug!(template = kind.file_name(), dir = %self.dir.display(), "no override; using embedded template");
            return Ok(kind.embedded().to_string());
        }
        std::fs::read_to_string(&path)
            .map_err(|e| TemplateError::Io { path: path.display().to_string(), reason: e.to_string() })
    }
}

/// Parsed base objects, loaded once and shared by every render.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseTemplates {
    pub namespace: Namespace,
    pub statefulset: StatefulSet,
    pub configmap: ConfigMap,
    pub service: Service,
    pub headless_service: Service,
    pub ingress: Ingress,
}

fn parse<T: DeserializeOwned>(store: &dyn TemplateStore, kind: TemplateKind) -> Result<T, TemplateError> {
    let text = store.source(kind)?;
    serde_yaml::from_str(&text).map_err(|e| TemplateError::Parse { template: kind.file_name(), reason: e.to_string() })
}

impl BaseTemplates {
    pub fn load(store: &dyn TemplateStore) -> Result<Self, TemplateError> {
        Ok(Self {
            namespace: parse(store, TemplateKind::Namespace)?,
            statefulset: parse(store, TemplateKind::StatefulSet)?,
            configmap: parse(store, TemplateKind::ConfigMap)?,
            service: parse(store, TemplateKind::Service)?,
            headless_service: parse(store, TemplateKind::HeadlessService)?,
            ingress: parse(store, TemplateKind::Ingress)?,
        })
    }

    pub fn embedded() -> Result<Self, TemplateError> { Self::load(&EmbeddedTemplates) }
}
