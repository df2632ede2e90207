//! In-memory [`ClusterClient`]: keeps applied objects as JSON, records every call
//! and can be told to fail specific operations.
//!
//! Semantics mirror a real API server closely enough for reconciliation tests:
//! namespaced writes fail while the namespace is missing, `create` on an
//! existing object reports `AlreadyExists`, and deleting a namespace drops
//! everything inside it.
//!
//! `apply` models server-side apply field ownership: the last applied body is
//! remembered per object, and a field it carried that the next body omits is
//! removed from the live object. Fields written by `create` are never removed
//! by `apply`. Lists of named items (containers, env, volumes) merge by `name`;
//! other lists are replaced whole.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value as Json;

use crate::{Applied, ClientError, ClusterClient, ManagedObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Apply,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

/// (kind, namespace or "", name)
type Key = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Json>,
    /// Last body sent through `apply`, i.e. the fields the apply manager owns.
    applied: BTreeMap<Key, Json>,
    calls: Vec<Call>,
    failures: Vec<(Op, String, ClientError)>,
}

#[derive(Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

impl MemoryClient {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `op` against `kind` fail with `err` (one-shot, FIFO per op/kind).
    pub fn fail_next(&self, op: Op, kind: &str, err: ClientError) {
        self.lock().failures.push((op, kind.to_string(), err));
    }

    pub fn calls(&self) -> Vec<Call> { self.lock().calls.clone() }

    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<Json> {
        let key = (kind.to_string(), namespace.unwrap_or("").to_string(), name.to_string());
        self.lock().objects.get(&key).cloned()
    }

    pub fn len(&self) -> usize { self.lock().objects.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Seed an object directly, bypassing call recording.
    pub fn insert(&self, obj: &ManagedObject) -> Result<(), ClientError> {
        let key = key_of(obj)?;
        let json = obj.to_json()?;
        self.lock().objects.insert(key, json);
        Ok(())
    }
}

fn key_of(obj: &ManagedObject) -> Result<Key, ClientError> {
    Ok((obj.kind().to_string(), obj.namespace()?.unwrap_or("").to_string(), obj.name()?.to_string()))
}

impl State {
    fn record(&mut self, op: Op, kind: &str, namespace: Option<&str>, name: &str) -> Result<(), ClientError> {
        self.calls.push(Call { op, kind: kind.to_string(), namespace: namespace.map(String::from), name: name.to_string() });
        if let Some(pos) = self.failures.iter().position(|(o, k, _)| *o == op && k == kind) {
            let (_, _, err) = self.failures.remove(pos);
            return Err(err);
        }
        Ok(())
    }

    fn namespace_exists(&self, ns: &str) -> bool {
        self.objects.contains_key(&("Namespace".to_string(), String::new(), ns.to_string()))
    }
}

fn item_name(v: &Json) -> Option<&str> { v.get("name").and_then(Json::as_str) }

fn is_named_list(items: &[Json]) -> bool { items.iter().all(|i| item_name(i).is_some()) }

/// Fold an applied body into the live object. `prev` is the previous applied body
/// at the same position, if the apply manager owned anything there.
fn merge_applied(live: &mut Json, prev: Option<&Json>, new: &Json) {
    match (live, new) {
        (Json::Object(live), Json::Object(new)) => {
            if let Some(Json::Object(prev)) = prev {
                for k in prev.keys() {
                    if !new.contains_key(k) {
                        live.remove(k);
                    }
                }
            }
            for (k, nv) in new {
                let pv = prev.and_then(|p| p.get(k));
                match live.get_mut(k) {
                    Some(lv) => merge_applied(lv, pv, nv),
                    None => {
                        live.insert(k.clone(), nv.clone());
                    }
                }
            }
        }
        (Json::Array(live), Json::Array(new)) if is_named_list(live) && is_named_list(new) => {
            if let Some(Json::Array(prev)) = prev {
                let dropped: Vec<&str> = prev
                    .iter()
                    .filter_map(item_name)
                    .filter(|n| !new.iter().any(|i| item_name(i) == Some(*n)))
                    .collect();
                live.retain(|i| !item_name(i).is_some_and(|n| dropped.contains(&n)));
            }
            for ni in new {
                let name = item_name(ni);
                let pi = match prev {
                    Some(Json::Array(p)) => p.iter().find(|i| item_name(i) == name),
                    _ => None,
                };
                match live.iter_mut().find(|i| item_name(i) == name) {
                    Some(li) => merge_applied(li, pi, ni),
                    None => live.push(ni.clone()),
                }
            }
        }
        (live, new) => *live = new.clone(),
    }
}

#[async_trait::async_trait]
impl ClusterClient for MemoryClient {
    async fn create(&self, obj: &ManagedObject) -> Result<(), ClientError> {
        let key = key_of(obj)?;
        let json = obj.to_json()?;
        let mut st = self.lock();
        let ns = obj.namespace()?;
        st.record(Op::Create, obj.kind(), ns, &key.2)?;
        if let Some(ns) = ns {
            if !st.namespace_exists(ns) {
                return Err(ClientError::NotFound { kind: "Namespace".into(), name: ns.to_string() });
            }
        }
        if st.objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists { kind: key.0, name: key.2 });
        }
        st.objects.insert(key, json);
        Ok(())
    }

    async fn apply(&self, obj: &ManagedObject) -> Result<Applied, ClientError> {
        let key = key_of(obj)?;
        let json = obj.to_json()?;
        let mut st = self.lock();
        let ns = obj.namespace()?;
        st.record(Op::Apply, obj.kind(), ns, &key.2)?;
        if let Some(ns) = ns {
            if !st.namespace_exists(ns) {
                return Err(ClientError::NotFound { kind: "Namespace".into(), name: ns.to_string() });
            }
        }
        let prev = st.applied.insert(key.clone(), json.clone());
        match st.objects.get_mut(&key) {
            Some(live) => {
                merge_applied(live, prev.as_ref(), &json);
                Ok(Applied::Updated)
            }
            None => {
                st.objects.insert(key, json);
                Ok(Applied::Created)
            }
        }
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClientError> {
        let mut st = self.lock();
        st.record(Op::Delete, "Namespace", None, name)?;
        if !st.namespace_exists(name) {
            return Err(ClientError::NotFound { kind: "Namespace".into(), name: name.to_string() });
        }
        let gone = |(kind, ns, obj_name): &Key| ns == name || (kind == "Namespace" && obj_name == name);
        st.objects.retain(|k, _| !gone(k));
        st.applied.retain(|k, _| !gone(k));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;

    fn ns(name: &str) -> ManagedObject {
        ManagedObject::Namespace(Namespace { metadata: ObjectMeta { name: Some(name.into()), ..Default::default() }, ..Default::default() })
    }

    fn cm(ns: &str, name: &str) -> ManagedObject {
        ManagedObject::ConfigMap(ConfigMap {
            metadata: ObjectMeta { name: Some(name.into()), namespace: Some(ns.into()), ..Default::default() },
            ..Default::default()
        })
    }

    fn cm_with(ns: &str, name: &str, data: &[(&str, &str)]) -> ManagedObject {
        ManagedObject::ConfigMap(ConfigMap {
            metadata: ObjectMeta { name: Some(name.into()), namespace: Some(ns.into()), ..Default::default() },
            data: Some(data.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn create_then_apply_then_cascade_delete() {
        let c = MemoryClient::new();
        assert!(matches!(c.create(&cm("a", "x")).await, Err(ClientError::NotFound { .. })));
        assert!(matches!(c.apply(&cm("a", "x")).await, Err(ClientError::NotFound { .. })));
        c.create(&ns("a")).await.unwrap();
        c.create(&cm("a", "x")).await.unwrap();
        assert!(matches!(c.create(&cm("a", "x")).await, Err(ClientError::AlreadyExists { .. })));
        assert_eq!(c.apply(&cm("a", "x")).await.unwrap(), Applied::Updated);
        assert_eq!(c.apply(&cm("a", "y")).await.unwrap(), Applied::Created);
        assert_eq!(c.len(), 3);

        c.delete_namespace("a").await.unwrap();
        assert!(c.is_empty());
        assert!(matches!(c.delete_namespace("a").await, Err(ClientError::NotFound { .. })));
    }

    #[tokio::test]
    async fn apply_drops_only_fields_it_owned() {
        let c = MemoryClient::new();
        c.create(&ns("a")).await.unwrap();
        c.create(&cm_with("a", "x", &[("posted", "1")])).await.unwrap();
        c.apply(&cm_with("a", "x", &[("one", "1"), ("two", "2")])).await.unwrap();
        c.apply(&cm_with("a", "x", &[("two", "2")])).await.unwrap();
        let live = c.object("ConfigMap", Some("a"), "x").unwrap();
        assert!(live["data"].get("one").is_none());
        assert_eq!(live["data"]["two"], "2");
        assert_eq!(live["data"]["posted"], "1");
    }

    #[test]
    fn named_lists_merge_by_name() {
        let mut live = json!({ "env": [
            { "name": "A", "value": "x" },
            { "name": "KEY", "value": "secret" }
        ]});
        let prev = live.clone();
        let new = json!({ "env": [
            { "name": "KEY", "valueFrom": { "secretKeyRef": { "name": "s", "key": "k" } } }
        ]});
        merge_applied(&mut live, Some(&prev), &new);
        assert_eq!(live, new);
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let c = MemoryClient::new();
        c.fail_next(Op::Create, "Namespace", ClientError::Transport("reset".into()));
        assert!(matches!(c.create(&ns("a")).await, Err(ClientError::Transport(_))));
        c.create(&ns("a")).await.unwrap();
        let calls = c.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|call| call.op == Op::Create && call.kind == "Namespace"));
    }
}
