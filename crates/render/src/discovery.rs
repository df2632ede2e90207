//! Peer discovery list shared by every replica.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use tsop_core::{ResolvedSpec, API_PORT, DISCOVERY_CONFIG_NAME, DISCOVERY_KEY, HEADLESS_SERVICE, PEER_PORT, WORKLOAD_NAME};

use crate::place;

/// `<workload>-<i>.<service>.<namespace>.svc.<domain>:<peer>:<api>` for every replica index.
pub fn peer_addresses(spec: &ResolvedSpec) -> Vec<String> {
    (0..spec.replicas)
        .map(|i| {
            format!(
                "{}-{}.{}.{}.svc.{}:{}:{}",
                WORKLOAD_NAME, i, HEADLESS_SERVICE, spec.namespace, spec.cluster_domain, PEER_PORT, API_PORT
            )
        })
        .collect()
}

pub fn nodes_value(spec: &ResolvedSpec) -> String { peer_addresses(spec).join(",") }

/// The node list is regenerated from scratch so scale-up and scale-down stay consistent.
/// The name is pinned because the workload mounts the config by name.
pub fn render(base: &ConfigMap, spec: &ResolvedSpec) -> ConfigMap {
    let mut cm = base.clone();
    cm.metadata.name = Some(DISCOVERY_CONFIG_NAME.to_string());
    place(&mut cm.metadata, spec);
    cm.data.get_or_insert_with(BTreeMap::new).insert(DISCOVERY_KEY.to_string(), nodes_value(spec));
    cm
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsop_core::Credential;

    fn spec(replicas: u32) -> ResolvedSpec {
        let mut s = ResolvedSpec::with_defaults(Credential::Literal("k".into()));
        s.replicas = replicas;
        s
    }

    #[test]
    fn two_replicas_in_default_namespace() {
        assert_eq!(
            nodes_value(&spec(2)),
            "typesense-0.ts.typesense.svc.cluster.local:8107:8108,typesense-1.ts.typesense.svc.cluster.local:8107:8108"
        );
    }

    #[test]
    fn list_has_one_entry_per_replica() {
        for n in [1u32, 3, 7, 16] {
            let nodes = nodes_value(&spec(n));
            let entries: Vec<_> = nodes.split(',').collect();
            assert_eq!(entries.len(), n as usize);
            for (i, e) in entries.iter().enumerate() {
                assert_eq!(*e, format!("typesense-{}.ts.typesense.svc.cluster.local:8107:8108", i));
            }
        }
    }

    #[test]
    fn namespace_and_domain_flow_into_addresses() {
        let mut s = spec(1);
        s.namespace = "search".into();
        s.cluster_domain = "k8s.internal".into();
        assert_eq!(nodes_value(&s), "typesense-0.ts.search.svc.k8s.internal:8107:8108");
    }

    #[test]
    fn scaling_down_replaces_the_whole_list() {
        let base = crate::BaseTemplates::embedded().unwrap();
        let big = render(&base.configmap, &spec(5));
        let small = render(&big, &spec(2));
        assert_eq!(small.data.unwrap()["nodes"].split(',').count(), 2);
    }

    #[test]
    fn longest_list_fits_in_one_config_object() {
        let mut s = spec(tsop_core::MAX_REPLICAS);
        s.namespace = "n".repeat(63);
        s.cluster_domain = "d".repeat(tsop_core::MAX_DNS_NAME);
        assert!(nodes_value(&s).len() < 1024 * 1024);
    }
}
