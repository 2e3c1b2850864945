use anyhow::Result;
use async_trait::async_trait;
use kahoy_core::Resource;
use tracing::info;

use crate::ResourceManager;

/// Logs what it was asked to do and succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopManager;

#[async_trait]
impl ResourceManager for NoopManager {
    async fn apply(&self, resources: &[Resource]) -> Result<()> {
        info!(resources = resources.len(), "noop apply");
        Ok(())
    }

    async fn delete(&self, resources: &[Resource]) -> Result<()> {
        info!(resources = resources.len(), "noop delete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::res;

    #[tokio::test]
    async fn succeeds_without_side_effects() {
        let m = NoopManager;
        m.apply(&[res("Pod", "ns", "a", "g")]).await.unwrap();
        m.delete(&[]).await.unwrap();
    }
}
