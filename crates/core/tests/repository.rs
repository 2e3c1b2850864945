#![forbid(unsafe_code)]

use kahoy_core::config::AppConfig;
use kahoy_core::{error_kind, factory, ErrorKind, GroupRepository, K8sObject, MemoryRepository, ResourceRepository};

fn cm(name: &str, ns: &str) -> K8sObject {
    K8sObject::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name, "namespace": ns},
    }))
    .unwrap()
}

#[test]
fn duplicate_resource_ids_are_rejected() {
    let mut repo = MemoryRepository::new();
    repo.add_resource(factory::new_resource(cm("a", "ns"), "g1", "/m/g1/a.yaml").unwrap()).unwrap();
    let err = repo
        .add_resource(factory::new_resource(cm("a", "ns"), "g2", "/m/g2/a.yaml").unwrap())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotValid);
    assert!(err.to_string().contains("/m/g1/a.yaml"), "err={}", err);
}

#[test]
fn group_path_collisions_are_rejected() {
    let cfg = AppConfig::default_v1();
    let mut repo = MemoryRepository::new();
    repo.add_group(factory::new_group("apps", "/m/apps", &cfg)).unwrap();
    repo.add_group(factory::new_group("apps", "/m/apps", &cfg)).unwrap();
    let err = repo.add_group(factory::new_group("apps", "/other/apps", &cfg)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotValid);
    assert_eq!(repo.list_groups().len(), 1);
}

#[test]
fn lookups_report_missing() {
    let repo = MemoryRepository::new();
    let err: anyhow::Error = repo.get_resource("core/v1/Pod/default/nope").unwrap_err().into();
    assert_eq!(error_kind(&err), Some(ErrorKind::Missing));
    assert_eq!(repo.get_group("root").unwrap_err().kind(), ErrorKind::Missing);
}

#[test]
fn listing_is_sorted_by_id() {
    let mut repo = MemoryRepository::new();
    for (name, ns) in [("z", "a"), ("a", "b"), ("m", "a")] {
        repo.add_resource(factory::new_resource(cm(name, ns), "root", "stdin").unwrap()).unwrap();
    }
    let ids: Vec<_> = repo.list_resources().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["core/v1/ConfigMap/a/m", "core/v1/ConfigMap/a/z", "core/v1/ConfigMap/b/a"]);
}
