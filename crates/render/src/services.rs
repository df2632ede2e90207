use k8s_openapi::api::core::v1::Service;
use tsop_core::{ResolvedSpec, HEADLESS_SERVICE};

use crate::{place, TemplateError};

/// Client-facing service plus the headless service that gives each replica a stable DNS name.
pub fn render(base: &Service, base_headless: &Service, spec: &ResolvedSpec) -> Result<(Service, Service), TemplateError> {
    let mut service = base.clone();
    place(&mut service.metadata, spec);

    let mut headless = base_headless.clone();
    if headless.metadata.name.as_deref() != Some(HEADLESS_SERVICE) {
        return Err(TemplateError::shape(
            "headless-service.yaml",
            format!("headless service must be named {:?}; peer addresses depend on it", HEADLESS_SERVICE),
        ));
    }
    place(&mut headless.metadata, spec);
    let headless_spec = headless.spec.get_or_insert_with(Default::default);
    headless_spec.cluster_ip = Some("None".to_string());
    // Peers must resolve each other before any of them is ready.
    headless_spec.publish_not_ready_addresses = Some(true);

    Ok((service, headless))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BaseTemplates;
    use tsop_core::Credential;

    #[test]
    fn both_services_land_in_resolved_namespace() {
        let base = BaseTemplates::embedded().unwrap();
        let mut spec = ResolvedSpec::with_defaults(Credential::Literal("k".into()));
        spec.namespace = "search".into();
        let (svc, headless) = render(&base.service, &base.headless_service, &spec).unwrap();
        assert_eq!(svc.metadata.namespace.as_deref(), Some("search"));
        assert_eq!(headless.metadata.namespace.as_deref(), Some("search"));
        let headless_spec = headless.spec.unwrap();
        assert_eq!(headless_spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(headless_spec.publish_not_ready_addresses, Some(true));
    }

    #[test]
    fn headless_override_cannot_hide_unready_peers() {
        let base = BaseTemplates::embedded().unwrap();
        let mut headless = base.headless_service.clone();
        let s = headless.spec.as_mut().unwrap();
        s.cluster_ip = None;
        s.publish_not_ready_addresses = Some(false);
        let spec = ResolvedSpec::with_defaults(Credential::Literal("k".into()));
        let (_, headless) = render(&base.service, &headless, &spec).unwrap();
        let headless_spec = headless.spec.unwrap();
        assert_eq!(headless_spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(headless_spec.publish_not_ready_addresses, Some(true));
    }

    #[test]
    fn renamed_headless_service_is_rejected() {
        let base = BaseTemplates::embedded().unwrap();
        let mut headless = base.headless_service.clone();
        headless.metadata.name = Some("peers".into());
        let spec = ResolvedSpec::with_defaults(Credential::Literal("k".into()));
        assert!(matches!(render(&base.service, &headless, &spec), Err(TemplateError::Shape { .. })));
    }
}
