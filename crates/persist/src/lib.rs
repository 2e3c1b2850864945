//! Kahoy state repositories: where a finished run's applied/deleted resources are recorded.

#![forbid(unsafe_code)]

use anyhow::Result;
use async_trait::async_trait;
use kahoy_core::State;

pub mod cluster;
pub mod report;

pub use cluster::{secret_name, ClusterStateRepository};
pub use report::StreamStateRepository;

#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn store_state(&self, state: &State) -> Result<()>;
}
