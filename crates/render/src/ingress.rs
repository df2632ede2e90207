use k8s_openapi::api::networking::v1::Ingress;
use tsop_core::ResolvedSpec;

use crate::{place, TemplateError};

/// Ingress route; only the first rule's host is overlaid.
pub fn render(base: &Ingress, spec: &ResolvedSpec) -> Result<Ingress, TemplateError> {
    let mut ing = base.clone();
    place(&mut ing.metadata, spec);
    let rule = ing
        .spec
        .as_mut()
        .and_then(|s| s.rules.as_mut())
        .and_then(|rules| rules.first_mut())
        .ok_or_else(|| TemplateError::shape("ingress.yaml", "at least one rule is required"))?;
    rule.host = Some(spec.host.clone());
    Ok(ing)
}
