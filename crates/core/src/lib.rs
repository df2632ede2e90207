//! tsop core: raw input spec, resolved spec and the validator between them.
//! Everything here is pure; no I/O beyond parsing caller-supplied text.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

mod error;
mod raw;
mod validate;

pub use error::ValidationError;
pub use raw::RawSpec;
pub use validate::validate;

pub const DEFAULT_NAMESPACE: &str = "typesense";
pub const DEFAULT_IMAGE: &str = "typesense/typesense";
pub const DEFAULT_HOST: &str = "typesense.dwbn.local";
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
pub const DEFAULT_REPLICAS: u32 = 3;
/// Upper bound on `spec.replicas`. At the longest namespace and cluster domain a
/// peer entry is about 350 bytes, so the discovery list stays well under the
/// 1 MiB config object limit.
pub const MAX_REPLICAS: u32 = 1000;
/// Longest DNS name the platform accepts; bounds the cluster domain.
pub const MAX_DNS_NAME: usize = 253;

/// Name of the stateful workload; peer hostnames are `<WORKLOAD_NAME>-<index>`.
pub const WORKLOAD_NAME: &str = "typesense";
/// Container inside the workload that runs the search server.
pub const SERVER_CONTAINER: &str = "typesense";
/// Headless service giving each replica a stable DNS name.
pub const HEADLESS_SERVICE: &str = "ts";
pub const DISCOVERY_CONFIG_NAME: &str = "nodeslist";
pub const DISCOVERY_KEY: &str = "nodes";
pub const PEER_PORT: u16 = 8107;
pub const API_PORT: u16 = 8108;
/// Cap on the scratch volume used when no persistent storage is declared.
pub const SCRATCH_SIZE_LIMIT: &str = "500Mi";
/// Env var carrying the access credential into the server container.
pub const CREDENTIAL_ENV: &str = "TYPESENSE_API_KEY";

/// CPU and memory for one side (requests or limits) of a resource block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quantities {
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resources {
    pub requests: Option<Quantities>,
    pub limits: Option<Quantities>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    pub storage_class_name: String,
    pub size: String,
}

/// How the server's access credential is provisioned.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Literal value, injected as a plain env var.
    Literal(String),
    /// Reference to a key of an existing secret in the target namespace.
    SecretRef { name: String, key: String },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Literal(_) => f.write_str("Literal(<redacted>)"),
            Credential::SecretRef { name, key } => f.debug_struct("SecretRef").field("name", name).field("key", key).finish(),
        }
    }
}

impl Serialize for Credential {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Credential::Literal(_) => s.serialize_str("<redacted>"),
            Credential::SecretRef { name, key } => s.serialize_str(&format!("secret:{}/{}", name, key)),
        }
    }
}

/// Validated, defaulted configuration consumed by every renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSpec {
    pub namespace: String,
    pub image: String,
    pub host: String,
    pub cluster_domain: String,
    pub replicas: u32,
    pub resources: Option<Resources>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub storage: Option<Storage>,
    pub credential: Credential,
}

impl ResolvedSpec {
    /// Spec with every default applied and the given credential.
    pub fn with_defaults(credential: Credential) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            host: DEFAULT_HOST.to_string(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            replicas: DEFAULT_REPLICAS,
            resources: None,
            node_selector: None,
            storage: None,
            credential,
        }
    }
}

pub mod prelude {
    pub use super::{validate, Credential, Quantities, RawSpec, ResolvedSpec, Resources, Storage, ValidationError};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_credential_never_leaks() {
        let c = Credential::Literal("hunter2".into());
        assert!(!format!("{:?}", c).contains("hunter2"));
        let spec = ResolvedSpec::with_defaults(c);
        let json = serde_json::to_string(&spec).unwrap();
        assert!(!json.contains("hunter2"), "json={}", json);
        assert!(json.contains("\"clusterDomain\":\"cluster.local\""));
    }

    #[test]
    fn secret_ref_is_visible_in_debug() {
        let c = Credential::SecretRef { name: "ts-auth".into(), key: "api-key".into() };
        let dbg = format!("{:?}", c);
        assert!(dbg.contains("ts-auth") && dbg.contains("api-key"));
    }
}
