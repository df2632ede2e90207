use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value as Json};

use crate::{
    Credential, Quantities, RawSpec, ResolvedSpec, Resources, Storage, ValidationError, DEFAULT_CLUSTER_DOMAIN,
    DEFAULT_HOST, DEFAULT_IMAGE, DEFAULT_NAMESPACE, DEFAULT_REPLICAS, MAX_DNS_NAME, MAX_REPLICAS,
};

static DNS_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static regex"));

type Section = Map<String, Json>;

/// Normalize a raw spec into a [`ResolvedSpec`], applying defaults for every
/// absent field. Pure; fails closed on the first malformed field.
pub fn validate(raw: &RawSpec) -> Result<ResolvedSpec, ValidationError> {
    let empty = Section::new();
    let spec = raw.spec()?.unwrap_or(&empty);
    let config = raw.config()?.unwrap_or(&empty);

    let namespace = string_or(spec, "namespace", "spec.namespace", DEFAULT_NAMESPACE)?;
    if namespace.len() > 63 || !DNS_LABEL.is_match(&namespace) {
        return Err(ValidationError::new("spec.namespace", format!("{:?} is not a valid DNS-1123 label", namespace)));
    }
    let image = string_or(spec, "image", "spec.image", DEFAULT_IMAGE)?;
    if image.trim().is_empty() {
        return Err(ValidationError::new("spec.image", "must not be empty"));
    }
    let host = string_or(spec, "host", "spec.host", DEFAULT_HOST)?;
    if host.trim().is_empty() {
        return Err(ValidationError::new("spec.host", "must not be empty"));
    }
    let cluster_domain = match first_present(spec, &["clusterDomain", "clusterdomain"]) {
        Some((key, v)) => {
            let path = format!("spec.{}", key);
            let domain = as_string(v, &path)?;
            if domain.trim().is_empty() {
                return Err(ValidationError::new(path, "must not be empty"));
            }
            if domain.len() > MAX_DNS_NAME {
                return Err(ValidationError::new(path, format!("longer than {} characters", MAX_DNS_NAME)));
            }
            domain
        }
        None => DEFAULT_CLUSTER_DOMAIN.to_string(),
    };

    Ok(ResolvedSpec {
        namespace,
        image,
        host,
        cluster_domain,
        replicas: replicas(spec)?,
        resources: resources(spec)?,
        node_selector: node_selector(spec)?,
        storage: storage(spec)?,
        credential: credential(config)?,
    })
}

fn first_present<'a>(m: &'a Section, keys: &[&'static str]) -> Option<(&'static str, &'a Json)> {
    keys.iter().find_map(|k| match m.get(*k) {
        None | Some(Json::Null) => None,
        Some(v) => Some((*k, v)),
    })
}

fn as_string(v: &Json, path: &str) -> Result<String, ValidationError> {
    v.as_str().map(|s| s.to_string()).ok_or_else(|| ValidationError::wrong_type(path, "a string"))
}

fn string_or(m: &Section, key: &'static str, path: &str, default: &str) -> Result<String, ValidationError> {
    match first_present(m, &[key]) {
        Some((_, v)) => as_string(v, path),
        None => Ok(default.to_string()),
    }
}

/// Quantities may be written as strings ("500m") or bare numbers (1).
fn quantity(m: &Section, key: &str, path: &str) -> Result<Option<String>, ValidationError> {
    match m.get(key) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Json::String(s)) => Ok(Some(s.clone())),
        Some(Json::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(ValidationError::wrong_type(path, "a quantity string or number")),
    }
}

fn replicas(spec: &Section) -> Result<u32, ValidationError> {
    let Some((_, v)) = first_present(spec, &["replicas"]) else { return Ok(DEFAULT_REPLICAS) };
    let n = match v {
        Json::Number(n) => n.as_u64(),
        Json::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n > MAX_REPLICAS as u64 => {
            Err(ValidationError::new("spec.replicas", format!("must be at most {}", MAX_REPLICAS)))
        }
        Some(n) if n >= 1 => Ok(n as u32),
        _ => Err(ValidationError::new("spec.replicas", "must be a positive integer")),
    }
}

/// Both `cpu` and `memory` are required whenever a requests/limits block is given.
fn quantities(block: &Section, path: &str) -> Result<Quantities, ValidationError> {
    let cpu = quantity(block, "cpu", &format!("{}.cpu", path))?;
    let memory = quantity(block, "memory", &format!("{}.memory", path))?;
    match (cpu, memory) {
        (Some(cpu), Some(memory)) => Ok(Quantities { cpu, memory }),
        (None, _) => Err(ValidationError::new(format!("{}.cpu", path), format!("memory or cpu is missing under {}", path))),
        (_, None) => Err(ValidationError::new(format!("{}.memory", path), format!("memory or cpu is missing under {}", path))),
    }
}

fn resources(spec: &Section) -> Result<Option<Resources>, ValidationError> {
    let Some((_, v)) = first_present(spec, &["resources"]) else { return Ok(None) };
    let block = v.as_object().ok_or_else(|| ValidationError::wrong_type("spec.resources", "a mapping"))?;
    let mut out = Resources::default();
    for (key, slot) in [("requests", &mut out.requests), ("limits", &mut out.limits)] {
        let path = format!("spec.resources.{}", key);
        match block.get(key) {
            None | Some(Json::Null) => {}
            Some(Json::Object(m)) => *slot = Some(quantities(m, &path)?),
            Some(_) => return Err(ValidationError::wrong_type(path, "a mapping")),
        }
    }
    Ok(Some(out))
}

fn node_selector(spec: &Section) -> Result<Option<BTreeMap<String, String>>, ValidationError> {
    let Some((_, v)) = first_present(spec, &["nodeSelector"]) else { return Ok(None) };
    let m = v.as_object().ok_or_else(|| ValidationError::wrong_type("spec.nodeSelector", "a mapping"))?;
    let mut out = BTreeMap::new();
    for (k, v) in m {
        let value = match v {
            Json::String(s) => s.clone(),
            Json::Bool(b) => b.to_string(),
            Json::Number(n) => n.to_string(),
            _ => return Err(ValidationError::wrong_type(format!("spec.nodeSelector.{}", k), "a scalar")),
        };
        out.insert(k.clone(), value);
    }
    Ok(Some(out))
}

fn storage(spec: &Section) -> Result<Option<Storage>, ValidationError> {
    let Some((section, v)) = first_present(spec, &["storage", "storageClass"]) else { return Ok(None) };
    let path = format!("spec.{}", section);
    let m = v.as_object().ok_or_else(|| ValidationError::wrong_type(path.clone(), "a mapping"))?;
    let class = match first_present(m, &["name", "storageClassName"]) {
        Some((key, v)) => Some(as_string(v, &format!("{}.{}", path, key))?),
        None => None,
    };
    let size = quantity(m, "size", &format!("{}.size", path))?;
    match (class.filter(|c| !c.trim().is_empty()), size) {
        (Some(storage_class_name), Some(size)) => Ok(Some(Storage { storage_class_name, size })),
        (None, _) => Err(ValidationError::new(format!("{}.name", path), "missing storage class name or size")),
        (_, None) => Err(ValidationError::new(format!("{}.size", path), "missing storage class name or size")),
    }
}

/// Exactly one of `config.password` / `config.passwordSecret` must be set.
fn credential(config: &Section) -> Result<Credential, ValidationError> {
    let literal = match first_present(config, &["password"]) {
        Some((_, v)) => Some(as_string(v, "config.password")?),
        None => None,
    };
    let secret = match first_present(config, &["passwordSecret"]) {
        Some((_, v)) => {
            let m = v.as_object().ok_or_else(|| ValidationError::wrong_type("config.passwordSecret", "a mapping"))?;
            let name = string_or(m, "name", "config.passwordSecret.name", "")?;
            let key = string_or(m, "key", "config.passwordSecret.key", "")?;
            if name.is_empty() { return Err(ValidationError::missing("config.passwordSecret.name")); }
            if key.is_empty() { return Err(ValidationError::missing("config.passwordSecret.key")); }
            Some(Credential::SecretRef { name, key })
        }
        None => None,
    };
    match (literal, secret) {
        (Some(_), Some(_)) => Err(ValidationError::new("config.password", "conflicts with config.passwordSecret; set only one")),
        (Some(p), None) if p.is_empty() => Err(ValidationError::new("config.password", "must not be empty")),
        (Some(p), None) => Ok(Credential::Literal(p)),
        (None, Some(s)) => Ok(s),
        (None, None) => Err(ValidationError::new(
            "config.password",
            "no credential provisioned; set config.password or config.passwordSecret",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: Json) -> RawSpec { RawSpec::new(v) }

    #[test]
    fn replicas_accepts_numeric_strings_and_rejects_zero() {
        let ok = validate(&raw(json!({"spec": {"replicas": "5"}, "config": {"password": "x"}}))).unwrap();
        assert_eq!(ok.replicas, 5);
        let err = validate(&raw(json!({"spec": {"replicas": 0}, "config": {"password": "x"}}))).unwrap_err();
        assert_eq!(err.field, "spec.replicas");
        let err = validate(&raw(json!({"spec": {"replicas": -2}, "config": {"password": "x"}}))).unwrap_err();
        assert_eq!(err.field, "spec.replicas");
    }

    #[test]
    fn replicas_are_capped() {
        let ok = validate(&raw(json!({"spec": {"replicas": MAX_REPLICAS}, "config": {"password": "x"}}))).unwrap();
        assert_eq!(ok.replicas, MAX_REPLICAS);
        for too_many in [json!(MAX_REPLICAS + 1), json!(i32::MAX), json!("2147483647")] {
            let err = validate(&raw(json!({"spec": {"replicas": too_many}, "config": {"password": "x"}}))).unwrap_err();
            assert_eq!(err.field, "spec.replicas");
        }
    }

    #[test]
    fn cluster_domain_must_not_be_blank() {
        let err = validate(&raw(json!({"spec": {"clusterDomain": ""}, "config": {"password": "x"}}))).unwrap_err();
        assert_eq!(err.field, "spec.clusterDomain");
        let err = validate(&raw(json!({"spec": {"clusterdomain": "  "}, "config": {"password": "x"}}))).unwrap_err();
        assert_eq!(err.field, "spec.clusterdomain");
        let long = "a".repeat(MAX_DNS_NAME + 1);
        let err = validate(&raw(json!({"spec": {"clusterDomain": long}, "config": {"password": "x"}}))).unwrap_err();
        assert_eq!(err.field, "spec.clusterDomain");
    }

    #[test]
    fn numeric_cpu_is_stringified() {
        let r = validate(&raw(json!({
            "spec": {"resources": {"limits": {"cpu": 2, "memory": "1Gi"}}},
            "config": {"password": "x"}
        })))
        .unwrap();
        let limits = r.resources.unwrap().limits.unwrap();
        assert_eq!(limits.cpu, "2");
        assert_eq!(limits.memory, "1Gi");
    }

    #[test]
    fn lowercase_cluster_domain_alias_is_honored() {
        let r = validate(&raw(json!({"spec": {"clusterdomain": "k8s.internal"}, "config": {"password": "x"}}))).unwrap();
        assert_eq!(r.cluster_domain, "k8s.internal");
    }

    #[test]
    fn namespace_must_be_dns_label() {
        let err = validate(&raw(json!({"spec": {"namespace": "My_NS"}, "config": {"password": "x"}}))).unwrap_err();
        assert_eq!(err.field, "spec.namespace");
    }

    #[test]
    fn node_selector_values_must_be_scalars() {
        let err = validate(&raw(json!({"spec": {"nodeSelector": {"pool": ["a"]}}, "config": {"password": "x"}}))).unwrap_err();
        assert_eq!(err.field, "spec.nodeSelector.pool");
    }

    #[test]
    fn credential_must_be_unambiguous() {
        let err = validate(&raw(json!({"config": {"password": "x", "passwordSecret": {"name": "s", "key": "k"}}}))).unwrap_err();
        assert!(err.reason.contains("conflicts"));
        let err = validate(&raw(json!({"config": {"passwordSecret": {"name": "s"}}}))).unwrap_err();
        assert_eq!(err.field, "config.passwordSecret.key");
        let err = validate(&raw(json!({"config": {"password": ""}}))).unwrap_err();
        assert_eq!(err.field, "config.password");
    }
}
