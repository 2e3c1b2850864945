//! Diff manager: shows what an apply or delete would change without touching the cluster.
//!
//! Apply uses `kubectl diff`. Delete has no server-side equivalent, so the live
//! objects are fetched with `kubectl get`, written one per file into a scratch
//! directory and diffed against empty input with `diff -u -N`.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kahoy_core::{codec, Error, K8sObject, Resource};
use tracing::debug;

use crate::exec::{Cmd, CmdRunner};
use crate::{write_out, KubectlConfig, ResourceManager, SharedWriter};

pub struct DiffManager {
    runner: Arc<dyn CmdRunner>,
    cfg: KubectlConfig,
    diff_cmd: String,
    out: SharedWriter,
}

impl DiffManager {
    pub fn new(runner: Arc<dyn CmdRunner>, cfg: KubectlConfig, out: SharedWriter) -> Self {
        Self { runner, cfg, diff_cmd: "diff".to_string(), out }
    }

    pub fn with_diff_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.diff_cmd = cmd.into();
        self
    }

    /// diff-style tools exit 1 when differences were found.
    fn diff_ok(code: Option<i32>) -> bool { matches!(code, Some(0) | Some(1)) }
}

/// `<group>.<version>.<Kind>.<namespace>.<name>`, an empty group for the core API.
pub fn diff_file_name(obj: &K8sObject) -> String {
    let (group, version) = obj.group_version();
    format!("{}.{}.{}.{}.{}", group, version, obj.kind(), obj.namespace(), obj.name())
}

#[async_trait]
impl ResourceManager for DiffManager {
    async fn apply(&self, resources: &[Resource]) -> Result<()> {
        if resources.is_empty() { return Ok(()); }
        let yaml = codec::encode(resources.iter().map(|r| r.k8s_object.as_ref()))?;
        let cmd = self.cfg.command(&["diff"]).args(self.cfg.apply_flags()).args(["-f", "-"]).stdin(yaml);
        let out = self.runner.output(&cmd).await.context("kubectl diff")?;
        if !Self::diff_ok(out.code) {
            return Err(out.into_error(&cmd).into());
        }
        write_out(&self.out, &out.stdout)
    }

    async fn delete(&self, resources: &[Resource]) -> Result<()> {
        if resources.is_empty() { return Ok(()); }
        let yaml = codec::encode(resources.iter().map(|r| r.k8s_object.as_ref()))?;
        let get = self.cfg.command(&["get", "--ignore-not-found=true", "-o", "yaml"]).args(["-f", "-"]).stdin(yaml);
        let out = self.runner.output(&get).await.context("kubectl get")?;
        if !out.success() {
            return Err(out.into_error(&get).into());
        }
        let live = codec::decode(&out.stdout).context("decoding live objects")?;
        debug!(requested = resources.len(), live = live.len(), "diffing deletions");

        let dir = tempfile::Builder::new()
            .prefix("kahoy-diff-")
            .tempdir()
            .map_err(|e| Error::fs("creating diff scratch dir", e))?;
        for obj in &live {
            let path = dir.path().join(diff_file_name(obj));
            let body = codec::encode(std::iter::once(obj))?;
            std::fs::write(&path, body).map_err(|e| Error::fs(format!("writing {}", path.display()), e))?;
            let cmd = Cmd::new(&self.diff_cmd).args(["-u", "-N"]).arg(path.to_string_lossy()).arg("-").stdin(Vec::new());
            let res = self.runner.output(&cmd).await.context("diff")?;
            if !Self::diff_ok(res.code) {
                return Err(res.into_error(&cmd).into());
            }
            write_out(&self.out, &res.stdout)?;
        }
        Ok(())
    }
}
