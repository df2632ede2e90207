use k8s_openapi::api::core::v1::Namespace;
use tsop_core::{ResolvedSpec, DEFAULT_NAMESPACE};

use crate::stamp_managed;

/// Namespace object; the template name is kept for the default namespace.
pub fn render(base: &Namespace, spec: &ResolvedSpec) -> Namespace {
    let mut ns = base.clone();
    if spec.namespace != DEFAULT_NAMESPACE || ns.metadata.name.is_none() {
        ns.metadata.name = Some(spec.namespace.clone());
    }
    stamp_managed(&mut ns.metadata);
    ns
}
