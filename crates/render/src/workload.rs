//! Stateful workload: image, scale, scheduling, storage and credential overlay.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, PersistentVolumeClaim, ResourceRequirements,
    SecretKeySelector, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde_json::json;
use tsop_core::{
    Credential, Quantities, ResolvedSpec, Resources, Storage, CREDENTIAL_ENV, SCRATCH_SIZE_LIMIT, SERVER_CONTAINER,
    WORKLOAD_NAME,
};

use crate::{place, TemplateError};

const TEMPLATE: &str = "statefulset.yaml";
pub const DATA_VOLUME: &str = "data";
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

fn credential_ref() -> String { format!("$({})", CREDENTIAL_ENV) }

/// Render the workload. `restart_stamp` is set on updates so the platform rolls
/// the pods even when nothing else changed.
pub fn render(base: &StatefulSet, spec: &ResolvedSpec, restart_stamp: Option<&str>) -> Result<StatefulSet, TemplateError> {
    let mut sts = base.clone();
    if sts.metadata.name.as_deref() != Some(WORKLOAD_NAME) {
        return Err(TemplateError::shape(TEMPLATE, format!("workload must be named {:?}; peer addresses depend on it", WORKLOAD_NAME)));
    }
    place(&mut sts.metadata, spec);

    let sts_spec = sts.spec.as_mut().ok_or_else(|| TemplateError::shape(TEMPLATE, "missing spec"))?;
    sts_spec.replicas = Some(i32::try_from(spec.replicas).unwrap_or(i32::MAX));

    if let Some(ts) = restart_stamp {
        sts_spec
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(RESTARTED_AT_ANNOTATION.to_string(), ts.to_string());
    }

    let pod = sts_spec.template.spec.as_mut().ok_or_else(|| TemplateError::shape(TEMPLATE, "missing spec.template.spec"))?;
    if let Some(sel) = &spec.node_selector {
        pod.node_selector = Some(sel.clone());
    }

    let container = pod
        .containers
        .iter_mut()
        .find(|c| c.name == SERVER_CONTAINER)
        .ok_or_else(|| TemplateError::shape(TEMPLATE, format!("no container named {:?}", SERVER_CONTAINER)))?;
    container.image = Some(spec.image.clone());
    if let Some(res) = &spec.resources {
        container.resources = Some(resource_requirements(res));
    }
    inject_credential(container, &spec.credential)?;

    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    volumes.retain(|v| v.name != DATA_VOLUME);
    match &spec.storage {
        Some(storage) => {
            if volumes.is_empty() {
                pod.volumes = None;
            }
            sts_spec.volume_claim_templates = Some(vec![data_claim(storage)?]);
        }
        None => {
            volumes.push(scratch_volume());
            sts_spec.volume_claim_templates = None;
        }
    }
    Ok(sts)
}

/// Credential goes in by env var name; the command line refers to it as `$(TYPESENSE_API_KEY)`.
fn inject_credential(container: &mut Container, credential: &Credential) -> Result<(), TemplateError> {
    let needle = credential_ref();
    let referenced = container
        .command
        .iter()
        .chain(container.args.iter())
        .flatten()
        .any(|arg| arg.contains(&needle));
    if !referenced {
        return Err(TemplateError::shape(TEMPLATE, format!("container {:?} never references {}", SERVER_CONTAINER, needle)));
    }
    let env = container.env.get_or_insert_with(Vec::new);
    env.retain(|e| e.name != CREDENTIAL_ENV);
    env.push(credential_env(credential));
    Ok(())
}

fn credential_env(credential: &Credential) -> EnvVar {
    match credential {
        Credential::Literal(value) => EnvVar { name: CREDENTIAL_ENV.to_string(), value: Some(value.clone()), ..Default::default() },
        Credential::SecretRef { name, key } => EnvVar {
            name: CREDENTIAL_ENV.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector { name: Some(name.clone()), key: key.clone(), ..Default::default() }),
                ..Default::default()
            }),
            ..Default::default()
        },
    }
}

fn quantity_map(q: &Quantities) -> BTreeMap<String, Quantity> {
    BTreeMap::from([("cpu".to_string(), Quantity(q.cpu.clone())), ("memory".to_string(), Quantity(q.memory.clone()))])
}

fn resource_requirements(res: &Resources) -> ResourceRequirements {
    ResourceRequirements {
        requests: res.requests.as_ref().map(quantity_map),
        limits: res.limits.as_ref().map(quantity_map),
        ..Default::default()
    }
}

fn data_claim(storage: &Storage) -> Result<PersistentVolumeClaim, TemplateError> {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": { "name": DATA_VOLUME },
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "storageClassName": storage.storage_class_name,
            "resources": { "requests": { "storage": storage.size } }
        }
    }))
    .map_err(|e| TemplateError::shape(TEMPLATE, format!("building volume claim: {}", e)))
}

fn scratch_volume() -> Volume {
    Volume {
        name: DATA_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource { size_limit: Some(Quantity(SCRATCH_SIZE_LIMIT.to_string())), ..Default::default() }),
        ..Default::default()
    }
}
