//! tsop kubehub: the platform client boundary.
//!
//! [`ClusterClient`] is the only way the reconciler touches the cluster. The
//! kube-backed [`KubeClient`] creates create-only objects with POST and
//! converges everything else with server-side apply under a single field
//! manager; [`memory::MemoryClient`] is an in-process stand-in used by tests
//! and dry runs.

#![forbid(unsafe_code)]

use std::fmt::Debug;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub mod memory;

/// One concrete object the reconciler manages.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedObject {
    Namespace(Namespace),
    ConfigMap(ConfigMap),
    StatefulSet(StatefulSet),
    Service(Service),
    Ingress(Ingress),
}

impl ManagedObject {
    pub fn kind(&self) -> &'static str {
        match self {
            ManagedObject::Namespace(_) => "Namespace",
            ManagedObject::ConfigMap(_) => "ConfigMap",
            ManagedObject::StatefulSet(_) => "StatefulSet",
            ManagedObject::Service(_) => "Service",
            ManagedObject::Ingress(_) => "Ingress",
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedObject::Namespace(o) => &o.metadata,
            ManagedObject::ConfigMap(o) => &o.metadata,
            ManagedObject::StatefulSet(o) => &o.metadata,
            ManagedObject::Service(o) => &o.metadata,
            ManagedObject::Ingress(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> Result<&str, ClientError> {
        self.meta()
            .name
            .as_deref()
            .ok_or_else(|| ClientError::Invalid(format!("{} is missing metadata.name", self.kind())))
    }

    /// Target namespace; `None` for cluster-scoped kinds.
    pub fn namespace(&self) -> Result<Option<&str>, ClientError> {
        if matches!(self, ManagedObject::Namespace(_)) {
            return Ok(None);
        }
        self.meta()
            .namespace
            .as_deref()
            .map(Some)
            .ok_or_else(|| ClientError::Invalid(format!("{} is missing metadata.namespace", self.kind())))
    }

    pub fn to_json(&self) -> Result<serde_json::Value, ClientError> {
        let v = match self {
            ManagedObject::Namespace(o) => serde_json::to_value(o),
            ManagedObject::ConfigMap(o) => serde_json::to_value(o),
            ManagedObject::StatefulSet(o) => serde_json::to_value(o),
            ManagedObject::Service(o) => serde_json::to_value(o),
            ManagedObject::Ingress(o) => serde_json::to_value(o),
        };
        v.map_err(|e| ClientError::Invalid(format!("serializing {}: {}", self.kind(), e)))
    }
}

/// Failures reported by a [`ClusterClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: String, name: String },
    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },
    #[error("api error {code} ({reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("invalid object: {0}")]
    Invalid(String),
}

impl ClientError {
    /// Worth retrying: throttling, server-side failures, write conflicts, transport.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Api { code, reason, .. } => *code == 429 || *code >= 500 || (*code == 409 && reason == "Conflict"),
            ClientError::Transport(_) => true,
            _ => false,
        }
    }

    pub fn classify(err: kube::Error, kind: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                ClientError::AlreadyExists { kind: kind.to_string(), name: name.to_string() }
            }
            kube::Error::Api(resp) if resp.code == 404 => ClientError::NotFound { kind: kind.to_string(), name: name.to_string() },
            kube::Error::Api(resp) => ClientError::Api { code: resp.code, reason: resp.reason, message: resp.message },
            kube::Error::SerdeError(e) => ClientError::Invalid(format!("decoding {} response: {}", kind, e)),
            other => ClientError::Transport(other.to_string()),
        }
    }
}

/// What a server-side apply did to the live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
}

/// Create/apply/delete per resource kind. Implementations must be safe to call
/// repeatedly with the same object.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create the object; `AlreadyExists` when it is already present.
    async fn create(&self, obj: &ManagedObject) -> Result<(), ClientError>;
    /// Server-side apply under one field manager: creates a missing object, and
    /// drops fields this manager applied before but `obj` no longer carries.
    async fn apply(&self, obj: &ManagedObject) -> Result<Applied, ClientError>;
    /// Delete a namespace; the platform cascades to its contents.
    async fn delete_namespace(&self, name: &str) -> Result<(), ClientError>;
}

/// Build a client from the default kubeconfig/in-cluster config, or from a named context.
pub async fn get_kube_client(context: Option<&str>) -> Result<Client, ClientError> {
    let config = match context {
        Some(ctx) => {
            let opts = kube::config::KubeConfigOptions { context: Some(ctx.to_string()), ..Default::default() };
            kube::Config::from_kubeconfig(&opts)
                .await
                .map_err(|e| ClientError::Transport(format!("loading kubeconfig context {}: {}", ctx, e)))?
        }
        None => kube::Config::infer().await.map_err(|e| ClientError::Transport(format!("inferring kube config: {}", e)))?,
    };
    Client::try_from(config).map_err(|e| ClientError::Transport(e.to_string()))
}

fn field_manager() -> String {
    std::env::var("TSOP_FIELD_MANAGER").unwrap_or_else(|_| "tsop".to_string())
}

/// [`ClusterClient`] on top of kube-rs.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    field_manager: String,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client, field_manager: field_manager() }
    }

    pub async fn try_default(context: Option<&str>) -> Result<Self, ClientError> {
        Ok(Self::new(get_kube_client(context).await?))
    }

    fn namespaced<K>(&self, ns: Option<&str>) -> Result<Api<K>, ClientError>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        let ns = ns.ok_or_else(|| ClientError::Invalid("namespace required for namespaced kind".into()))?;
        Ok(Api::namespaced(self.client.clone(), ns))
    }
}

async fn create_in<K>(api: Api<K>, kind: &str, name: &str, obj: &K) -> Result<(), ClientError>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    api.create(&PostParams::default(), obj).await.map_err(|e| ClientError::classify(e, kind, name))?;
    Ok(())
}

async fn apply_in<K>(api: Api<K>, kind: &str, name: &str, obj: &K, pp: &PatchParams) -> Result<Applied, ClientError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    // The lookup only feeds the report; the apply itself is an upsert either way.
    let existed = api.get_metadata_opt(name).await.map_err(|e| ClientError::classify(e, kind, name))?.is_some();
    api.patch(name, pp, &Patch::Apply(obj)).await.map_err(|e| ClientError::classify(e, kind, name))?;
    Ok(if existed { Applied::Updated } else { Applied::Created })
}

#[async_trait::async_trait]
impl ClusterClient for KubeClient {
    async fn create(&self, obj: &ManagedObject) -> Result<(), ClientError> {
        let (kind, name, ns) = (obj.kind(), obj.name()?, obj.namespace()?);
        debug!(kind, name, ns = ?ns, "create");
        match obj {
            ManagedObject::Namespace(o) => create_in(Api::<Namespace>::all(self.client.clone()), kind, name, o).await,
            ManagedObject::ConfigMap(o) => create_in(self.namespaced::<ConfigMap>(ns)?, kind, name, o).await,
            ManagedObject::StatefulSet(o) => create_in(self.namespaced::<StatefulSet>(ns)?, kind, name, o).await,
            ManagedObject::Service(o) => create_in(self.namespaced::<Service>(ns)?, kind, name, o).await,
            ManagedObject::Ingress(o) => create_in(self.namespaced::<Ingress>(ns)?, kind, name, o).await,
        }
    }

    async fn apply(&self, obj: &ManagedObject) -> Result<Applied, ClientError> {
        let (kind, name, ns) = (obj.kind(), obj.name()?, obj.namespace()?);
        debug!(kind, name, ns = ?ns, manager = %self.field_manager, "server-side apply");
        let pp = PatchParams::apply(&self.field_manager).force();
        match obj {
            ManagedObject::Namespace(o) => apply_in(Api::<Namespace>::all(self.client.clone()), kind, name, o, &pp).await,
            ManagedObject::ConfigMap(o) => apply_in(self.namespaced::<ConfigMap>(ns)?, kind, name, o, &pp).await,
            ManagedObject::StatefulSet(o) => apply_in(self.namespaced::<StatefulSet>(ns)?, kind, name, o, &pp).await,
            ManagedObject::Service(o) => apply_in(self.namespaced::<Service>(ns)?, kind, name, o, &pp).await,
            ManagedObject::Ingress(o) => apply_in(self.namespaced::<Ingress>(ns)?, kind, name, o, &pp).await,
        }
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClientError> {
        debug!(name, "delete namespace");
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await.map_err(|e| ClientError::classify(e, "Namespace", name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cm(name: Option<&str>, ns: Option<&str>) -> ManagedObject {
        ManagedObject::ConfigMap(ConfigMap {
            metadata: ObjectMeta { name: name.map(String::from), namespace: ns.map(String::from), ..Default::default() },
            ..Default::default()
        })
    }

    #[test]
    fn namespaced_objects_require_a_namespace() {
        assert_eq!(cm(Some("x"), Some("ns")).namespace().unwrap(), Some("ns"));
        assert!(matches!(cm(Some("x"), None).namespace(), Err(ClientError::Invalid(_))));
        assert!(matches!(cm(None, Some("ns")).name(), Err(ClientError::Invalid(_))));
    }

    #[test]
    fn namespace_objects_are_cluster_scoped() {
        let ns = ManagedObject::Namespace(Namespace {
            metadata: ObjectMeta { name: Some("typesense".into()), ..Default::default() },
            ..Default::default()
        });
        assert_eq!(ns.namespace().unwrap(), None);
        let json = ns.to_json().unwrap();
        assert_eq!(json["kind"], "Namespace");
        assert_eq!(json["apiVersion"], "v1");
    }

    #[test]
    fn transient_classification() {
        let api = |code: u16, reason: &str| ClientError::Api { code, reason: reason.into(), message: String::new() };
        assert!(api(503, "ServiceUnavailable").is_transient());
        assert!(api(429, "TooManyRequests").is_transient());
        assert!(api(409, "Conflict").is_transient());
        assert!(!api(422, "Invalid").is_transient());
        assert!(!api(403, "Forbidden").is_transient());
        assert!(ClientError::Transport("reset".into()).is_transient());
        assert!(!ClientError::NotFound { kind: "Ingress".into(), name: "typesense".into() }.is_transient());
    }

    #[test]
    fn kube_errors_map_to_client_errors() {
        let resp = |code: u16, reason: &str| {
            kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".into(),
                message: "boom".into(),
                reason: reason.into(),
                code,
            })
        };
        assert_eq!(
            ClientError::classify(resp(409, "AlreadyExists"), "Service", "ts"),
            ClientError::AlreadyExists { kind: "Service".into(), name: "ts".into() }
        );
        assert_eq!(
            ClientError::classify(resp(404, "NotFound"), "Ingress", "typesense"),
            ClientError::NotFound { kind: "Ingress".into(), name: "typesense".into() }
        );
        assert!(matches!(ClientError::classify(resp(500, "InternalError"), "ConfigMap", "nodeslist"), ClientError::Api { code: 500, .. }));
    }
}
