//! Stream loader: one flat group of resources read from a byte source (stdin).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kahoy_core::config::AppConfig;
use kahoy_core::{codec, factory, Error, MemoryRepository, RepositoryLoader, DEFAULT_ROOT_GROUP_ID};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tracing::info;

pub const STDIN_MANIFEST_PATH: &str = "stdin";
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(10);

type Reader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone)]
pub struct StreamLoaderConfig {
    pub group_id: String,
    pub timeout: Duration,
    pub app_config: AppConfig,
}

impl Default for StreamLoaderConfig {
    fn default() -> Self {
        Self {
            group_id: DEFAULT_ROOT_GROUP_ID.to_string(),
            timeout: DEFAULT_STREAM_TIMEOUT,
            app_config: AppConfig::default_v1(),
        }
    }
}

/// Reads its source once; a second `load` is an error.
pub struct StreamLoader {
    reader: Mutex<Option<Reader>>,
    cfg: StreamLoaderConfig,
}

impl StreamLoader {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static, cfg: StreamLoaderConfig) -> Self {
        Self { reader: Mutex::new(Some(Box::new(reader))), cfg }
    }

    pub fn stdin(cfg: StreamLoaderConfig) -> Self { Self::new(tokio::io::stdin(), cfg) }

    async fn read_all(&self) -> Result<Vec<u8>> {
        let mut reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::not_valid("stream source already consumed"))?;
        let mut task = tokio::spawn(async move {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await.map(|_| buf)
        });
        match tokio::time::timeout(self.cfg.timeout, &mut task).await {
            Ok(joined) => {
                let read = joined.context("stream read task failed")?;
                read.map_err(|e| Error::fs("reading manifest stream", e).into())
            }
            Err(_) => {
                task.abort();
                Err(Error::timeout(format!("no manifest stream received after {:?}", self.cfg.timeout)).into())
            }
        }
    }
}

#[async_trait]
impl RepositoryLoader for StreamLoader {
    async fn load(&self) -> Result<MemoryRepository> {
        let raw = self.read_all().await?;
        let objs = codec::decode(&raw).context("decoding manifest stream")?;
        let mut repo = MemoryRepository::new();
        repo.add_group(factory::new_group(&self.cfg.group_id, "", &self.cfg.app_config))?;
        for obj in objs {
            repo.add_resource(factory::new_resource(obj, &self.cfg.group_id, STDIN_MANIFEST_PATH)?)?;
        }
        info!(resources = repo.len(), "manifest stream loaded");
        Ok(repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kahoy_core::{error_kind, ErrorKind, GroupRepository, ResourceRepository};

    const TWO: &str = "apiVersion: v1\nkind: Namespace\nmetadata: {name: a}\n---\napiVersion: v1\nkind: Namespace\nmetadata: {name: b}\n";

    #[tokio::test]
    async fn loads_single_group_from_stream() {
        let loader = StreamLoader::new(std::io::Cursor::new(TWO.as_bytes().to_vec()), StreamLoaderConfig::default());
        let repo = loader.load().await.unwrap();
        let res = repo.list_resources();
        assert_eq!(res.len(), 2);
        assert!(res.iter().all(|r| r.group_id == "root" && r.manifest_path == "stdin"));
        let groups = repo.list_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].path, "");
    }

    #[tokio::test]
    async fn duplicates_are_fatal() {
        let raw = format!("{}---\n{}", TWO, TWO);
        let loader = StreamLoader::new(std::io::Cursor::new(raw.into_bytes()), StreamLoaderConfig::default());
        let err = loader.load().await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotValid));
    }

    #[tokio::test]
    async fn stalled_stream_times_out() {
        let (_keep_open, rx) = tokio::io::duplex(64);
        let cfg = StreamLoaderConfig { timeout: Duration::from_millis(50), ..Default::default() };
        let loader = StreamLoader::new(rx, cfg);
        let err = loader.load().await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn source_is_read_once() {
        let loader = StreamLoader::new(std::io::Cursor::new(TWO.as_bytes().to_vec()), StreamLoaderConfig::default());
        loader.load().await.unwrap();
        let err = loader.load().await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotValid));
    }
}
