//! tsop apply: the reconciliation orchestrator.
//!
//! One call validates the raw spec, renders every resource, then walks the
//! fixed step order (namespace, discovery config, workload, services, ingress)
//! applying each object through a [`ClusterClient`]. Steps are idempotent and
//! retried on transient failures; a hard failure aborts the remaining steps and
//! leaves earlier ones in place.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{error, info, warn};
use tsop_core::{validate, RawSpec};
use tsop_kubehub::{Applied, ClientError, ClusterClient, ManagedObject};
use tsop_render::{render_all, BaseTemplates, ResourceKind};

mod error;
pub mod retry;

pub use error::{PlatformApiError, ReconcileError, Verb};
pub use retry::RetryPolicy;
pub use tsop_ops::CleanupError;

/// How a step reaches its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApplyMode {
    /// Create; an existing object is left alone.
    CreateOnly,
    /// Server-side apply: creates a missing object, converges an existing one,
    /// and drops fields an earlier apply set that the rendered object no longer has.
    Apply,
}

impl ApplyMode {
    /// Namespace and services are only ever created; everything else is applied.
    pub fn for_step(step: ResourceKind) -> Self {
        match step {
            ResourceKind::Namespace | ResourceKind::ServicePair => ApplyMode::CreateOnly,
            _ => ApplyMode::Apply,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Created,
    Patched,
    /// Already present and left as is.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: ResourceKind,
    pub kind: &'static str,
    pub name: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub namespace: String,
    pub is_update: bool,
    pub steps: Vec<StepReport>,
}

impl ReconcileReport {
    pub fn outcome_of(&self, kind: &str, name: &str) -> Option<Outcome> {
        self.steps.iter().find(|s| s.kind == kind && s.name == name).map(|s| s.outcome)
    }
}

pub struct Reconciler {
    client: Arc<dyn ClusterClient>,
    templates: BaseTemplates,
    retry: RetryPolicy,
}

impl Reconciler {
    /// Retry policy comes from the environment; see [`RetryPolicy::from_env`].
    pub fn new(client: Arc<dyn ClusterClient>, templates: BaseTemplates) -> Self {
        Self { client, templates, retry: RetryPolicy::from_env() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn reconcile(&self, raw: &RawSpec, is_update: bool) -> Result<ReconcileReport, ReconcileError> {
        let t0 = Instant::now();
        counter!("reconcile_attempts", 1u64);
        let res = self.reconcile_inner(raw, is_update).await;
        histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(report) => {
                counter!("reconcile_ok", 1u64);
                info!(namespace = %report.namespace, is_update, steps = report.steps.len(), "reconciled");
            }
            Err(e) => {
                counter!("reconcile_err", 1u64, "class" => e.class());
                error!(is_update, error = %e, class = e.class(), "reconcile failed");
            }
        }
        res
    }

    async fn reconcile_inner(&self, raw: &RawSpec, is_update: bool) -> Result<ReconcileReport, ReconcileError> {
        let spec = validate(raw)?;
        let stamp = is_update.then(tsop_ops::restart_stamp);
        // Render everything up front so a bad template never leaves a half-applied chain.
        let rendered = render_all(&self.templates, &spec, stamp.as_deref())?;

        let mut report = ReconcileReport { namespace: spec.namespace.clone(), is_update, steps: Vec::new() };
        for resource in rendered {
            let step = resource.kind();
            let mode = ApplyMode::for_step(step);
            for obj in resource.into_objects() {
                let outcome = self.apply(&spec.namespace, mode, is_update, &obj).await?;
                let name = obj.name().map(str::to_string).unwrap_or_default();
                counter!("apply_step_total", 1u64, "kind" => obj.kind());
                info!(?step, kind = obj.kind(), namespace = %spec.namespace, name = %name, ?outcome, "applied");
                report.steps.push(StepReport { step, kind: obj.kind(), name, outcome });
            }
        }
        Ok(report)
    }

    /// Bring one object to its rendered state.
    async fn apply(
        &self,
        namespace: &str,
        mode: ApplyMode,
        is_update: bool,
        obj: &ManagedObject,
    ) -> Result<Outcome, PlatformApiError> {
        let kind = obj.kind();
        let client = self.client.as_ref();
        match mode {
            ApplyMode::CreateOnly => {
                let name = obj.name().map_err(|source| fail(obj, namespace, Verb::Create, source))?;
                match self.retry.run(kind, name, || client.create(obj)).await {
                    Ok(()) => Ok(Outcome::Created),
                    Err(ClientError::AlreadyExists { .. }) => Ok(Outcome::Unchanged),
                    Err(e) => Err(fail(obj, namespace, Verb::Create, e)),
                }
            }
            ApplyMode::Apply => {
                let name = obj.name().map_err(|source| fail(obj, namespace, Verb::Apply, source))?;
                let applied = self
                    .retry
                    .run(kind, name, || client.apply(obj))
                    .await
                    .map_err(|e| fail(obj, namespace, Verb::Apply, e))?;
                match (applied, is_update) {
                    (Applied::Created, true) => warn!(kind, namespace, name, "not found on update; created"),
                    (Applied::Updated, false) => warn!(kind, namespace, name, "already exists on install; updated"),
                    _ => {}
                }
                Ok(match applied {
                    Applied::Created => Outcome::Created,
                    Applied::Updated => Outcome::Patched,
                })
            }
        }
    }

    /// Delete the whole deployment; see [`tsop_ops::cleanup`].
    pub async fn cleanup(&self, namespace: &str) -> Result<(), CleanupError> {
        tsop_ops::cleanup(self.client.as_ref(), namespace).await
    }
}

fn fail(obj: &ManagedObject, namespace: &str, op: Verb, source: ClientError) -> PlatformApiError {
    let err = PlatformApiError {
        kind: obj.kind(),
        op,
        namespace: namespace.to_string(),
        name: obj.name().unwrap_or("<unnamed>").to_string(),
        source,
    };
    error!(kind = err.kind, %op, namespace, name = %err.name, error = %err.source, "apply step failed");
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_and_services_are_create_only() {
        assert_eq!(ApplyMode::for_step(ResourceKind::Namespace), ApplyMode::CreateOnly);
        assert_eq!(ApplyMode::for_step(ResourceKind::ServicePair), ApplyMode::CreateOnly);
        assert_eq!(ApplyMode::for_step(ResourceKind::DiscoveryConfig), ApplyMode::Apply);
        assert_eq!(ApplyMode::for_step(ResourceKind::StatefulWorkload), ApplyMode::Apply);
        assert_eq!(ApplyMode::for_step(ResourceKind::IngressRoute), ApplyMode::Apply);
    }

    #[test]
    fn platform_error_names_the_kind() {
        let err = PlatformApiError {
            kind: "Ingress",
            op: Verb::Apply,
            namespace: "typesense".into(),
            name: "typesense".into(),
            source: ClientError::Transport("connection reset".into()),
        };
        assert_eq!(err.to_string(), "Ingress apply failed: transport: connection reset");
        assert!(err.is_transient());
    }
}
