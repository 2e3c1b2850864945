use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kahoy_core::Resource;
use metrics::counter;
use tracing::info;

use crate::exec::CmdRunner;
use crate::{KubectlConfig, ResourceManager};

/// Creates missing namespaces of the resources before applying them.
pub struct NamespaceManager {
    inner: Arc<dyn ResourceManager>,
    runner: Arc<dyn CmdRunner>,
    cfg: KubectlConfig,
}

impl NamespaceManager {
    pub fn new(inner: Arc<dyn ResourceManager>, runner: Arc<dyn CmdRunner>, cfg: KubectlConfig) -> Self {
        Self { inner, runner, cfg }
    }

    async fn ensure(&self, ns: &str) -> Result<()> {
        let get = self.cfg.command(&["get", "namespace", ns]);
        let out = self.runner.output(&get).await.with_context(|| format!("checking namespace {}", ns))?;
        if out.success() { return Ok(()); }
        if !out.stderr_str().to_lowercase().contains("notfound") {
            return Err(out.into_error(&get).into());
        }
        info!(namespace = ns, "creating missing namespace");
        let create = self.cfg.command(&["create", "namespace", ns]);
        let out = self.runner.output(&create).await.with_context(|| format!("creating namespace {}", ns))?;
        if !out.success() {
            return Err(out.into_error(&create).into());
        }
        counter!("kahoy_namespaces_created_total", 1u64);
        Ok(())
    }
}

#[async_trait]
impl ResourceManager for NamespaceManager {
    async fn apply(&self, resources: &[Resource]) -> Result<()> {
        let namespaces: BTreeSet<&str> =
            resources.iter().map(|r| r.k8s_object.namespace()).filter(|ns| !ns.is_empty()).collect();
        for ns in namespaces {
            self.ensure(ns).await?;
        }
        self.inner.apply(resources).await
    }

    async fn delete(&self, resources: &[Resource]) -> Result<()> { self.inner.delete(resources).await }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use kahoy_core::{error_kind, ErrorKind};

    #[tokio::test]
    async fn ensures_distinct_namespaces_then_applies() {
        let runner = Arc::new(FakeRunner::with(vec![
            ok("ns1"),
            fail(1, "Error from server (NotFound): namespaces \"ns2\" not found"),
            ok("namespace/ns2 created"),
        ]));
        let rec = Arc::new(Recorder::default());
        let m = NamespaceManager::new(rec.clone(), runner.clone(), KubectlConfig::default());
        let rs = [res("Pod", "ns2", "a", "g"), res("Pod", "ns1", "b", "g"), res("ClusterRole", "", "c", "g")];
        m.apply(&rs).await.unwrap();

        let cmds: Vec<_> = runner.seen().iter().map(|c| c.display()).collect();
        assert_eq!(
            cmds,
            vec!["kubectl get namespace ns1", "kubectl get namespace ns2", "kubectl create namespace ns2"]
        );
        let ids = rs.iter().map(|r| r.id.clone()).collect();
        assert_eq!(rec.calls(), vec![Call::Apply(ids)]);
    }

    #[tokio::test]
    async fn other_get_failures_are_fatal() {
        let runner = Arc::new(FakeRunner::with(vec![fail(1, "Unable to connect to the server")]));
        let rec = Arc::new(Recorder::default());
        let m = NamespaceManager::new(rec.clone(), runner, KubectlConfig::default());
        let err = m.apply(&[res("Pod", "ns1", "a", "g")]).await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::External));
        assert!(rec.calls().is_empty());
    }

    #[tokio::test]
    async fn delete_passes_through() {
        let runner = Arc::new(FakeRunner::default());
        let rec = Arc::new(Recorder::default());
        let m = NamespaceManager::new(rec.clone(), runner.clone(), KubectlConfig::default());
        m.delete(&[res("Pod", "ns1", "a", "g")]).await.unwrap();
        assert!(runner.seen().is_empty());
        assert_eq!(rec.calls().len(), 1);
    }
}
