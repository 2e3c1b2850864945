//! Kahoy resource managers.
//!
//! A manager applies or deletes a list of resources. Layers wrap an inner
//! manager and add one behaviour each; an apply run is composed as
//! `Timeout -> Hook -> Wait -> Namespace -> Priority -> Kubectl`, while dry-run
//! and diff runs use the bare [`DryRunManager`] / [`DiffManager`] inside a
//! [`TimeoutManager`].

#![forbid(unsafe_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use kahoy_core::Resource;

pub mod diff;
pub mod dryrun;
pub mod exec;
pub mod hook;
pub mod kubectl;
pub mod namespace;
pub mod noop;
pub mod priority;
pub mod timeout;
pub mod wait;

pub use diff::DiffManager;
pub use dryrun::DryRunManager;
pub use exec::{Cmd, CmdOutput, CmdRunner, ProcessRunner};
pub use hook::HookManager;
pub use kubectl::KubectlManager;
pub use namespace::NamespaceManager;
pub use noop::NoopManager;
pub use priority::PriorityManager;
pub use timeout::TimeoutManager;
pub use wait::WaitManager;

#[async_trait]
pub trait ResourceManager: Send + Sync {
    async fn apply(&self, resources: &[Resource]) -> Result<()>;
    async fn delete(&self, resources: &[Resource]) -> Result<()>;
}

/// Output sink shared by managers that print for the user (dry-run, diff).
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

pub fn stdout_writer() -> SharedWriter { Arc::new(Mutex::new(std::io::stdout())) }

pub(crate) fn write_out(w: &SharedWriter, data: &[u8]) -> Result<()> {
    let mut w = w.lock().map_err(|_| anyhow::anyhow!("output writer poisoned"))?;
    w.write_all(data)?;
    w.flush()?;
    Ok(())
}

/// How kubectl is invoked against the target cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubectlConfig {
    pub cmd: String,
    pub kube_context: Option<String>,
    pub kube_config: Option<String>,
    pub field_manager: Option<String>,
    pub force_conflicts: bool,
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self { cmd: "kubectl".to_string(), kube_context: None, kube_config: None, field_manager: None, force_conflicts: false }
    }
}

impl KubectlConfig {
    /// `kubectl <verb> [--context ..] [--kubeconfig ..]`
    pub(crate) fn command(&self, verb: &[&str]) -> Cmd {
        let mut c = Cmd::new(&self.cmd).args(verb.iter().copied());
        if let Some(ctx) = self.kube_context.as_deref().filter(|s| !s.is_empty()) {
            c = c.arg(format!("--context={}", ctx));
        }
        if let Some(cfg) = self.kube_config.as_deref().filter(|s| !s.is_empty()) {
            c = c.arg(format!("--kubeconfig={}", cfg));
        }
        c
    }

    /// Flags shared by `apply` and `diff` (server-side apply semantics).
    pub(crate) fn apply_flags(&self) -> Vec<String> {
        let mut f = vec!["--server-side=true".to_string(), format!("--force-conflicts={}", self.force_conflicts)];
        if let Some(fm) = self.field_manager.as_deref().filter(|s| !s.is_empty()) {
            f.push(format!("--field-manager={}", fm));
        }
        f
    }
}
