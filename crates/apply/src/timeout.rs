use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use kahoy_core::{Error, Resource};
use metrics::counter;
use tracing::warn;

use crate::ResourceManager;

/// Bounds every call on the inner manager; the inner future is dropped on expiry.
pub struct TimeoutManager {
    inner: Arc<dyn ResourceManager>,
    timeout: Duration,
}

impl TimeoutManager {
    pub fn new(inner: Arc<dyn ResourceManager>, timeout: Duration) -> Self { Self { inner, timeout } }

    async fn bounded<F>(&self, op: &str, fut: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(op, timeout = ?self.timeout, "manager deadline exceeded");
                counter!("kahoy_manager_timeouts_total", 1u64);
                Err(Error::timeout(format!("{} did not finish within {:?}", op, self.timeout)).into())
            }
        }
    }
}

#[async_trait]
impl ResourceManager for TimeoutManager {
    async fn apply(&self, resources: &[Resource]) -> Result<()> {
        self.bounded("apply", self.inner.apply(resources)).await
    }

    async fn delete(&self, resources: &[Resource]) -> Result<()> {
        self.bounded("delete", self.inner.delete(resources)).await
    }
}
