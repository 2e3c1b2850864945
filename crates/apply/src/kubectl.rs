use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kahoy_core::{codec, Resource};
use metrics::counter;
use tracing::info;

use crate::exec::CmdRunner;
use crate::{KubectlConfig, ResourceManager};

/// Innermost manager of an apply run: `kubectl apply|delete -f -`.
pub struct KubectlManager {
    runner: Arc<dyn CmdRunner>,
    cfg: KubectlConfig,
}

impl KubectlManager {
    pub fn new(runner: Arc<dyn CmdRunner>, cfg: KubectlConfig) -> Self { Self { runner, cfg } }

    async fn run(&self, verb: &str, flags: Vec<String>, resources: &[Resource]) -> Result<()> {
        if resources.is_empty() { return Ok(()); }
        let yaml = codec::encode(resources.iter().map(|r| r.k8s_object.as_ref()))?;
        let cmd = self.cfg.command(&[verb]).args(flags).args(["-f", "-"]).stdin(yaml);
        let out = self.runner.output(&cmd).await.with_context(|| format!("kubectl {}", verb))?;
        for line in out.stdout_str().lines().filter(|l| !l.trim().is_empty()) {
            info!(verb, "{}", line);
        }
        if !out.success() {
            counter!("kahoy_kubectl_errors_total", 1u64, "verb" => verb.to_string());
            return Err(out.into_error(&cmd).into());
        }
        counter!("kahoy_kubectl_resources_total", resources.len() as u64, "verb" => verb.to_string());
        Ok(())
    }
}

#[async_trait]
impl ResourceManager for KubectlManager {
    async fn apply(&self, resources: &[Resource]) -> Result<()> {
        self.run("apply", self.cfg.apply_flags(), resources).await
    }

    async fn delete(&self, resources: &[Resource]) -> Result<()> {
        self.run("delete", vec!["--ignore-not-found=true".to_string()], resources).await
    }
}
