#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use kahoy_core::{DesiredState, RepositoryLoader, ResourceRepository};
use kahoy_loader::{FsLoader, FsLoaderConfig, MemoryFilesystem};
use kahoy_plan::{ExcludeKubeTypeProcessor, LabelSelectorProcessor, Planner, ProcessorChain};

fn doc(kind: &str, name: &str, app: &str) -> String {
    format!("apiVersion: v1\nkind: {}\nmetadata:\n  name: {}\n  namespace: ns\n  labels:\n    app: {}\n", kind, name, app)
}

fn loader(files: &[(&str, String)]) -> FsLoader {
    let mut fs = MemoryFilesystem::new();
    fs.insert_dir("/m");
    for (p, c) in files {
        fs.insert(*p, c.clone().into_bytes());
    }
    FsLoader::new(Arc::new(fs), FsLoaderConfig::new("/m")).unwrap()
}

#[tokio::test]
async fn planner_covers_union_of_ids_after_processing() {
    let old = loader(&[
        ("/m/a/x.yaml", doc("ConfigMap", "x", "web")),
        ("/m/a/gone.yaml", doc("ConfigMap", "gone", "web")),
        ("/m/a/secret.yaml", doc("Secret", "s", "web")),
    ])
    .load()
    .await
    .unwrap();
    let new = loader(&[
        ("/m/a/x.yaml", doc("ConfigMap", "x", "web")),
        ("/m/b/y.yaml", doc("ConfigMap", "y", "web")),
        ("/m/b/other.yaml", doc("ConfigMap", "other", "db")),
    ])
    .load()
    .await
    .unwrap();

    let chain = ProcessorChain::new()
        .with(ExcludeKubeTypeProcessor::new(&["v1/Secret"]).unwrap())
        .with(LabelSelectorProcessor::new("app=web").unwrap());
    let old = chain.process(old.list_resources()).unwrap();
    let new = chain.process(new.list_resources()).unwrap();

    let plan = Planner::new(false).plan(&old, &new);
    let ids: BTreeSet<_> = plan.iter().map(|p| p.resource.id.clone()).collect();
    let union: BTreeSet<_> = old.iter().chain(new.iter()).map(|r| r.id.clone()).collect();
    assert_eq!(ids, union);
    assert_eq!(plan.len(), union.len());

    let missing: Vec<_> = plan.iter().filter(|p| p.state == DesiredState::Missing).map(|p| p.resource.name.as_str()).collect();
    assert_eq!(missing, vec!["gone"]);
    let y = plan.iter().find(|p| p.resource.name == "y").unwrap();
    assert_eq!(y.resource.group_id, "b");
}

#[tokio::test]
async fn only_on_diff_drops_unchanged_resources() {
    let old = loader(&[("/m/x.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata: {name: x}\ndata: {a: \"1\", b: \"2\"}\n".into())])
        .load()
        .await
        .unwrap();
    let new = loader(&[("/m/x.yaml", "kind: ConfigMap\napiVersion: v1\ndata:\n  b: \"2\"\n  a: \"1\"\nmetadata:\n  name: x\n".into())])
        .load()
        .await
        .unwrap();
    assert!(Planner::new(true).plan(&old.list_resources(), &new.list_resources()).is_empty());
}
