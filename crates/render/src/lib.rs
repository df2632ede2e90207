//! tsop render: overlay a [`ResolvedSpec`] onto the base templates.
//!
//! Every renderer is pure. The restart timestamp used on updates is passed in by
//! the caller rather than read from a clock here.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use tsop_core::ResolvedSpec;
use tsop_kubehub::ManagedObject;

pub mod discovery;
pub mod ingress;
pub mod namespace;
pub mod services;
pub mod templates;
pub mod workload;

pub use templates::{BaseTemplates, DirTemplates, EmbeddedTemplates, TemplateError, TemplateKind, TemplateStore, TEMPLATE_VERSION};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "tsop";
pub const TEMPLATE_VERSION_ANNOTATION: &str = "tsop.io/template-version";

/// The five logical resources of one deployment, in apply order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    Namespace,
    DiscoveryConfig,
    StatefulWorkload,
    ServicePair,
    IngressRoute,
}

impl ResourceKind {
    /// Discovery config must exist before the workload starts, and both before traffic is routed in.
    pub const ORDER: [ResourceKind; 5] = [
        ResourceKind::Namespace,
        ResourceKind::DiscoveryConfig,
        ResourceKind::StatefulWorkload,
        ResourceKind::ServicePair,
        ResourceKind::IngressRoute,
    ];

    /// Platform kind name, used in error and log context.
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::DiscoveryConfig => "ConfigMap",
            ResourceKind::StatefulWorkload => "StatefulSet",
            ResourceKind::ServicePair => "Service",
            ResourceKind::IngressRoute => "Ingress",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderedResource {
    Namespace(Namespace),
    DiscoveryConfig(ConfigMap),
    StatefulWorkload(StatefulSet),
    ServicePair { service: Service, headless: Service },
    IngressRoute(Ingress),
}

impl RenderedResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            RenderedResource::Namespace(_) => ResourceKind::Namespace,
            RenderedResource::DiscoveryConfig(_) => ResourceKind::DiscoveryConfig,
            RenderedResource::StatefulWorkload(_) => ResourceKind::StatefulWorkload,
            RenderedResource::ServicePair { .. } => ResourceKind::ServicePair,
            RenderedResource::IngressRoute(_) => ResourceKind::IngressRoute,
        }
    }

    /// Platform objects to apply, in order.
    pub fn into_objects(self) -> Vec<ManagedObject> {
        match self {
            RenderedResource::Namespace(o) => vec![ManagedObject::Namespace(o)],
            RenderedResource::DiscoveryConfig(o) => vec![ManagedObject::ConfigMap(o)],
            RenderedResource::StatefulWorkload(o) => vec![ManagedObject::StatefulSet(o)],
            RenderedResource::ServicePair { service, headless } => {
                vec![ManagedObject::Service(service), ManagedObject::Service(headless)]
            }
            RenderedResource::IngressRoute(o) => vec![ManagedObject::Ingress(o)],
        }
    }
}

/// Render one logical resource. `restart_stamp` is only honored by the workload.
pub fn render(
    kind: ResourceKind,
    base: &BaseTemplates,
    spec: &ResolvedSpec,
    restart_stamp: Option<&str>,
) -> Result<RenderedResource, TemplateError> {
    Ok(match kind {
        ResourceKind::Namespace => RenderedResource::Namespace(namespace::render(&base.namespace, spec)),
        ResourceKind::DiscoveryConfig => RenderedResource::DiscoveryConfig(discovery::render(&base.configmap, spec)),
        ResourceKind::StatefulWorkload => {
            RenderedResource::StatefulWorkload(workload::render(&base.statefulset, spec, restart_stamp)?)
        }
        ResourceKind::ServicePair => {
            let (service, headless) = services::render(&base.service, &base.headless_service, spec)?;
            RenderedResource::ServicePair { service, headless }
        }
        ResourceKind::IngressRoute => RenderedResource::IngressRoute(ingress::render(&base.ingress, spec)?),
    })
}

/// Render all five resources in apply order.
pub fn render_all(
    base: &BaseTemplates,
    spec: &ResolvedSpec,
    restart_stamp: Option<&str>,
) -> Result<Vec<RenderedResource>, TemplateError> {
    ResourceKind::ORDER.iter().map(|k| render(*k, base, spec, restart_stamp)).collect()
}

/// Mark an object as owned by this tool and record the template version it came from.
pub(crate) fn stamp_managed(meta: &mut ObjectMeta) {
    meta.labels.get_or_insert_with(BTreeMap::new).insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    meta.annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(TEMPLATE_VERSION_ANNOTATION.to_string(), TEMPLATE_VERSION.to_string());
}

/// Namespaced objects are always placed in the resolved namespace.
pub(crate) fn place(meta: &mut ObjectMeta, spec: &ResolvedSpec) {
    meta.namespace = Some(spec.namespace.clone());
    stamp_managed(meta);
}
