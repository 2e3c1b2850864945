use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use kahoy_core::{GroupRepository, Resource};
use tracing::info;

use crate::ResourceManager;

/// Sleeps after a successful apply for the longest wait of the touched groups.
pub struct WaitManager {
    inner: Arc<dyn ResourceManager>,
    groups: Arc<dyn GroupRepository>,
}

impl WaitManager {
    pub fn new(inner: Arc<dyn ResourceManager>, groups: Arc<dyn GroupRepository>) -> Self { Self { inner, groups } }

    fn wait_for(&self, resources: &[Resource]) -> Result<Duration> {
        let mut max = Duration::ZERO;
        for r in resources {
            max = max.max(self.groups.get_group(&r.group_id)?.wait.duration);
        }
        Ok(max)
    }
}

#[async_trait]
impl ResourceManager for WaitManager {
    async fn apply(&self, resources: &[Resource]) -> Result<()> {
        let wait = self.wait_for(resources)?;
        self.inner.apply(resources).await?;
        if !wait.is_zero() {
            info!(wait = ?wait, "waiting after apply");
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }

    async fn delete(&self, resources: &[Resource]) -> Result<()> { self.inner.delete(resources).await }
}
