use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kahoy_core::{GroupRepository, Resource};
use metrics::counter;
use tracing::{debug, info};

use crate::ResourceManager;

/// Splits an apply into batches by group priority, lowest first.
pub struct PriorityManager {
    inner: Arc<dyn ResourceManager>,
    groups: Arc<dyn GroupRepository>,
}

impl PriorityManager {
    pub fn new(inner: Arc<dyn ResourceManager>, groups: Arc<dyn GroupRepository>) -> Self { Self { inner, groups } }

    /// List order is preserved inside each batch.
    pub fn batches(&self, resources: &[Resource]) -> Result<Vec<(i32, Vec<Resource>)>> {
        let mut by_prio: BTreeMap<i32, Vec<Resource>> = BTreeMap::new();
        for r in resources {
            let g = self.groups.get_group(&r.group_id).with_context(|| format!("resource {}", r.id))?;
            by_prio.entry(g.priority).or_default().push(r.clone());
        }
        Ok(by_prio.into_iter().collect())
    }
}

#[async_trait]
impl ResourceManager for PriorityManager {
    async fn apply(&self, resources: &[Resource]) -> Result<()> {
        let batches = self.batches(resources)?;
        let total = batches.len();
        for (i, (priority, batch)) in batches.into_iter().enumerate() {
            info!(priority, batch = i + 1, total, resources = batch.len(), "applying priority batch");
            counter!("kahoy_apply_batches_total", 1u64);
            self.inner.apply(&batch).await.with_context(|| format!("priority batch {}", priority))?;
        }
        Ok(())
    }

    async fn delete(&self, resources: &[Resource]) -> Result<()> {
        debug!(resources = resources.len(), "delete ignores priorities");
        self.inner.delete(resources).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use kahoy_core::config::AppConfig;
    use kahoy_core::{error_kind, factory, ErrorKind, MemoryRepository};

    fn groups(prios: &[(&str, i32)]) -> Arc<dyn GroupRepository> {
        let mut repo = MemoryRepository::new();
        for (id, p) in prios {
            let mut g = factory::new_group(id, &format!("/m/{}", id), &AppConfig::default_v1());
            g.priority = *p;
            repo.add_group(g).unwrap();
        }
        Arc::new(repo)
    }

    fn id(name: &str) -> String { format!("core/v1/Pod/ns/{}", name) }

    #[tokio::test]
    async fn batches_ascend_by_priority() {
        let rec = Arc::new(Recorder::default());
        let m = PriorityManager::new(rec.clone(), groups(&[("g1", 235), ("g2", 42), ("g3", 579)]));
        let rs = [
            res("Pod", "ns", "r1", "g1"),
            res("Pod", "ns", "r2", "g2"),
            res("Pod", "ns", "r3", "g1"),
            res("Pod", "ns", "r4", "g3"),
            res("Pod", "ns", "r5", "g2"),
        ];
        m.apply(&rs).await.unwrap();
        assert_eq!(
            rec.calls(),
            vec![
                Call::Apply(vec![id("r2"), id("r5")]),
                Call::Apply(vec![id("r1"), id("r3")]),
                Call::Apply(vec![id("r4")]),
            ]
        );
    }

    #[tokio::test]
    async fn first_failed_batch_aborts() {
        let rec = Arc::new(Recorder { fail_apply: true, ..Default::default() });
        let m = PriorityManager::new(rec.clone(), groups(&[("a", 1), ("b", 2)]));
        assert!(m.apply(&[res("Pod", "ns", "x", "a"), res("Pod", "ns", "y", "b")]).await.is_err());
        assert_eq!(rec.calls().len(), 1);
    }

    #[tokio::test]
    async fn delete_is_a_single_batch() {
        let rec = Arc::new(Recorder::default());
        let m = PriorityManager::new(rec.clone(), groups(&[("a", 1), ("b", 2)]));
        m.delete(&[res("Pod", "ns", "y", "b"), res("Pod", "ns", "x", "a")]).await.unwrap();
        assert_eq!(rec.calls(), vec![Call::Delete(vec![id("y"), id("x")])]);
    }

    #[tokio::test]
    async fn unknown_group_is_missing() {
        let m = PriorityManager::new(Arc::new(Recorder::default()), groups(&[]));
        let err = m.apply(&[res("Pod", "ns", "x", "nope")]).await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Missing));
    }
}
