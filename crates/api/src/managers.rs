//! Manager chain assembly.
//!
//! A chain needs the group repository of the loaded snapshots, so it is built
//! per run once loading has finished.

use std::sync::Arc;
use std::time::Duration;

use kahoy_apply::{
    CmdRunner, DiffManager, DryRunManager, HookManager, KubectlConfig, KubectlManager, NamespaceManager,
    PriorityManager, ResourceManager, SharedWriter, TimeoutManager, WaitManager,
};
use kahoy_core::GroupRepository;
use tracing::debug;

pub trait ManagerFactory: Send + Sync {
    fn build(&self, groups: Arc<dyn GroupRepository>) -> Arc<dyn ResourceManager>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerMode {
    Kubectl,
    DryRun,
    Diff,
}

pub struct ChainManagerFactory {
    pub mode: ManagerMode,
    pub runner: Arc<dyn CmdRunner>,
    pub kubectl: KubectlConfig,
    pub create_namespace: bool,
    pub timeout: Option<Duration>,
    pub out: SharedWriter,
}

impl ChainManagerFactory {
    fn bounded(&self, m: Arc<dyn ResourceManager>) -> Arc<dyn ResourceManager> {
        match self.timeout {
            Some(t) => Arc::new(TimeoutManager::new(m, t)),
            None => m,
        }
    }
}

impl ManagerFactory for ChainManagerFactory {
    /// Timeout, hooks, wait, namespaces, priority batches, kubectl. Dry-run and
    /// diff get only the timeout around them.
    fn build(&self, groups: Arc<dyn GroupRepository>) -> Arc<dyn ResourceManager> {
        debug!(mode = ?self.mode, create_namespace = self.create_namespace, timeout = ?self.timeout, "building manager chain");
        let runner = Arc::clone(&self.runner);
        let core: Arc<dyn ResourceManager> = match self.mode {
            ManagerMode::DryRun => return self.bounded(Arc::new(DryRunManager::new(Arc::clone(&self.out)))),
            ManagerMode::Diff => {
                return self.bounded(Arc::new(DiffManager::new(runner, self.kubectl.clone(), Arc::clone(&self.out))))
            }
            ManagerMode::Kubectl => Arc::new(KubectlManager::new(Arc::clone(&runner), self.kubectl.clone())),
        };
        let mut m: Arc<dyn ResourceManager> = Arc::new(PriorityManager::new(core, Arc::clone(&groups)));
        if self.create_namespace {
            m = Arc::new(NamespaceManager::new(m, Arc::clone(&runner), self.kubectl.clone()));
        }
        m = Arc::new(WaitManager::new(m, Arc::clone(&groups)));
        m = Arc::new(HookManager::new(m, groups, runner, self.kubectl.clone()));
        self.bounded(m)
    }
}
