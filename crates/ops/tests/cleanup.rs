use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tsop_kubehub::memory::{MemoryClient, Op};
use tsop_kubehub::{ClientError, ManagedObject};
use tsop_ops::cleanup;

fn seed(client: &MemoryClient, ns: &str) {
    let meta = |name: &str, namespace: Option<&str>| ObjectMeta {
        name: Some(name.into()),
        namespace: namespace.map(String::from),
        ..Default::default()
    };
    client.insert(&ManagedObject::Namespace(Namespace { metadata: meta(ns, None), ..Default::default() })).unwrap();
    client
        .insert(&ManagedObject::ConfigMap(ConfigMap { metadata: meta("nodeslist", Some(ns)), ..Default::default() }))
        .unwrap();
}

#[tokio::test]
async fn cleanup_removes_namespace_and_contents() {
    let client = MemoryClient::new();
    seed(&client, "typesense");
    seed(&client, "other");
    cleanup(&client, "typesense").await.unwrap();
    assert!(client.object("Namespace", None, "typesense").is_none());
    assert!(client.object("ConfigMap", Some("typesense"), "nodeslist").is_none());
    assert!(client.object("ConfigMap", Some("other"), "nodeslist").is_some());
}

#[tokio::test]
async fn cleanup_of_missing_namespace_is_ok() {
    let client = MemoryClient::new();
    cleanup(&client, "never-created").await.unwrap();
    assert_eq!(client.calls().len(), 1);
}

#[tokio::test]
async fn other_failures_are_wrapped() {
    let client = MemoryClient::new();
    seed(&client, "typesense");
    client.fail_next(Op::Delete, "Namespace", ClientError::Api { code: 403, reason: "Forbidden".into(), message: "no".into() });
    let err = cleanup(&client, "typesense").await.unwrap_err();
    assert_eq!(err.namespace, "typesense");
    assert!(err.to_string().contains("403"), "err={}", err);
    assert!(client.object("Namespace", None, "typesense").is_some());
}
