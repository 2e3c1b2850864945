use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kahoy_apply::dryrun::render_tree;
use kahoy_apply::{stdout_writer, CmdRunner, KubectlConfig, SharedWriter};
use kahoy_core::config::AppConfig;
use kahoy_core::{
    DesiredState, GroupRepository, MemoryRepository, RepositoryLoader, Resource, ResourceRepository, State,
    DEFAULT_ROOT_GROUP_ID,
};
use kahoy_kubehub::{get_kube_client, ClientOptions, KubeSecretClient, SecretClient};
use kahoy_loader::{FsLoader, FsLoaderConfig, GitSnapshot, GitSnapshotConfig, OsFilesystem, StreamLoader, StreamLoaderConfig};
use kahoy_persist::{ClusterStateRepository, StateRepository, StreamStateRepository};
use kahoy_plan::{AnnotationSelectorProcessor, ExcludeKubeTypeProcessor, LabelSelectorProcessor, Planner, ProcessorChain};
use metrics::{counter, histogram};
use tracing::{debug, info};

use crate::groups::LayeredGroups;
use crate::managers::{ChainManagerFactory, ManagerFactory, ManagerMode};
use crate::options::{ApplyOptions, RunMode, STDIN_PATH};
use crate::new_state_id;

/// OLD side of a first deployment.
pub struct EmptyLoader;

#[async_trait]
impl RepositoryLoader for EmptyLoader {
    async fn load(&self) -> Result<MemoryRepository> { Ok(MemoryRepository::new()) }
}

/// Planned work of one run, sorted by resource id.
pub struct RunPlan {
    pub started_at: DateTime<Utc>,
    pub apply: Vec<Resource>,
    pub delete: Vec<Resource>,
    groups: Arc<dyn GroupRepository>,
}

impl RunPlan {
    pub fn is_empty(&self) -> bool { self.apply.is_empty() && self.delete.is_empty() }

    /// Delete tree followed by the apply tree; empty sides are omitted.
    pub fn summary(&self) -> String {
        let mut s = render_tree("Delete", &self.delete);
        s.push_str(&render_tree("Apply", &self.apply));
        s
    }
}

pub struct Runner {
    old: Arc<dyn RepositoryLoader>,
    new: Arc<dyn RepositoryLoader>,
    processors: ProcessorChain,
    planner: Planner,
    managers: Arc<dyn ManagerFactory>,
    states: Vec<Arc<dyn StateRepository>>,
    persist: bool,
}

impl Runner {
    pub fn new(old: Arc<dyn RepositoryLoader>, new: Arc<dyn RepositoryLoader>, managers: Arc<dyn ManagerFactory>) -> Self {
        Self {
            old,
            new,
            processors: ProcessorChain::new(),
            planner: Planner::new(false),
            managers,
            states: Vec::new(),
            persist: true,
        }
    }

    pub fn with_processors(mut self, chain: ProcessorChain) -> Self {
        self.processors = chain;
        self
    }

    pub fn with_planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_state_repository(mut self, repo: Arc<dyn StateRepository>) -> Self {
        self.states.push(repo);
        self
    }

    pub fn persist_state(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub async fn from_options(opts: ApplyOptions, app_config: AppConfig, cmd_runner: Arc<dyn CmdRunner>) -> Result<Self> {
        Self::from_options_with(opts, app_config, cmd_runner, None, stdout_writer()).await
    }

    /// Like [`Runner::from_options`] with an explicit secret client (built
    /// from the kube options when unset) and output for dry-run and diff.
    pub async fn from_options_with(
        opts: ApplyOptions,
        app_config: AppConfig,
        cmd_runner: Arc<dyn CmdRunner>,
        secrets: Option<Arc<dyn SecretClient>>,
        out: SharedWriter,
    ) -> Result<Self> {
        opts.validate()?;
        info!(mode = opts.mode.as_str(), new = %opts.fs_new_manifests_path.display(), dry_run = opts.dry_run, diff = opts.diff, "configuring run");

        let mut states: Vec<Arc<dyn StateRepository>> = Vec::new();
        let (old, new): (Arc<dyn RepositoryLoader>, Arc<dyn RepositoryLoader>) = match opts.mode {
            RunMode::Paths => {
                let old: Arc<dyn RepositoryLoader> = match opts.fs_old_manifests_path.as_deref() {
                    Some(p) => fs_loader(p, &opts, &app_config)?,
                    None => Arc::new(EmptyLoader),
                };
                (old, fs_loader(&opts.fs_new_manifests_path, &opts, &app_config)?)
            }
            RunMode::Git => {
                let new_path = opts.fs_new_manifests_path.clone();
                let old_path = opts.fs_old_manifests_path.clone().unwrap_or_else(|| new_path.clone());
                let mut gcfg = GitSnapshotConfig::new(&new_path, old_path, &new_path);
                gcfg.before_commit = opts.git_before_commit_sha.clone();
                gcfg.default_branch = opts.git_default_branch.clone();
                gcfg.diff_include_filter = opts.git_diff_filter;
                gcfg.exclude_regex = opts.fs_exclude.clone();
                gcfg.include_regex = opts.fs_include.clone();
                gcfg.app_config = app_config.clone();
                let snap = GitSnapshot::open(gcfg).context("preparing git snapshots")?;
                debug!(before = %snap.before_commit, head = %snap.head_commit, changed = snap.changed_files.len(), "git snapshot ready");
                let (old, new): (Arc<dyn RepositoryLoader>, Arc<dyn RepositoryLoader>) = (snap.old_loader(), snap.new_loader());
                (old, new)
            }
            RunMode::Kubernetes => {
                let client = match secrets {
                    Some(c) => c,
                    None => {
                        let copts = ClientOptions { kube_config: opts.kube_config.clone(), kube_context: opts.kube_context.clone() };
                        Arc::new(KubeSecretClient::new(get_kube_client(&copts).await?))
                    }
                };
                let cluster = Arc::new(ClusterStateRepository::new(
                    client,
                    &opts.kube_provider_namespace,
                    &opts.kube_provider_id,
                    app_config.clone(),
                )?);
                states.push(cluster.clone());
                let old: Arc<dyn RepositoryLoader> = cluster;
                (old, fs_loader(&opts.fs_new_manifests_path, &opts, &app_config)?)
            }
        };

        let mut chain = ProcessorChain::new();
        if !opts.kube_exclude_type.is_empty() {
            chain.push(Box::new(ExcludeKubeTypeProcessor::new(&opts.kube_exclude_type)?));
        }
        if !opts.kube_labels_selector.trim().is_empty() {
            chain.push(Box::new(LabelSelectorProcessor::new(&opts.kube_labels_selector)?));
        }
        if !opts.kube_annotations_selector.trim().is_empty() {
            chain.push(Box::new(AnnotationSelectorProcessor::new(&opts.kube_annotations_selector)?));
        }

        if opts.persists_state() {
            if let Some(target) = opts.report_path.as_deref() {
                states.insert(0, Arc::new(StreamStateRepository::from_target(target)?));
            }
        }

        let mode = if opts.dry_run {
            ManagerMode::DryRun
        } else if opts.diff {
            ManagerMode::Diff
        } else {
            ManagerMode::Kubectl
        };
        let managers = ChainManagerFactory {
            mode,
            runner: cmd_runner,
            kubectl: KubectlConfig {
                cmd: opts.kubectl_path.clone(),
                kube_context: opts.kube_context.clone(),
                kube_config: opts.kube_config.clone(),
                field_manager: opts.kube_field_manager.clone(),
                force_conflicts: opts.kube_force_conflicts,
            },
            create_namespace: opts.create_namespace,
            timeout: opts.execution_timeout,
            out,
        };

        let mut runner = Runner::new(old, new, Arc::new(managers))
            .with_processors(chain)
            .with_planner(Planner::new(opts.include_changes))
            .persist_state(opts.persists_state());
        for s in states {
            runner = runner.with_state_repository(s);
        }
        Ok(runner)
    }

    /// Load both snapshots, filter them and plan.
    pub async fn prepare(&self) -> Result<RunPlan> {
        let started_at = Utc::now();
        let old = self.old.load().await.context("loading old manifests")?;
        let new = self.new.load().await.context("loading new manifests")?;
        debug!(old = old.len(), new = new.len(), "snapshots loaded");

        let old_res = self.processors.process(old.list_resources()).map_err(anyhow::Error::from).context("processing old resources")?;
        let new_res = self.processors.process(new.list_resources()).map_err(anyhow::Error::from).context("processing new resources")?;

        let mut apply = Vec::new();
        let mut delete = Vec::new();
        for ps in self.planner.plan(&old_res, &new_res) {
            match ps.state {
                DesiredState::Exists => apply.push(ps.resource),
                DesiredState::Missing => delete.push(ps.resource),
            }
        }
        apply.sort_by(|a, b| a.id.cmp(&b.id));
        delete.sort_by(|a, b| a.id.cmp(&b.id));
        counter!("kahoy_planned_resources_total", apply.len() as u64, "state" => "exists");
        counter!("kahoy_planned_resources_total", delete.len() as u64, "state" => "missing");
        info!(apply = apply.len(), delete = delete.len(), "plan ready");

        let groups = Arc::new(LayeredGroups::new(Arc::new(new), Arc::new(old)));
        Ok(RunPlan { started_at, apply, delete, groups })
    }

    /// Delete, then apply, then record the run.
    pub async fn execute(&self, plan: RunPlan) -> Result<State> {
        let clock = Instant::now();
        let manager = self.managers.build(Arc::clone(&plan.groups));
        if !plan.delete.is_empty() {
            manager.delete(&plan.delete).await.context("deleting resources")?;
        }
        if !plan.apply.is_empty() {
            manager.apply(&plan.apply).await.context("applying resources")?;
        }

        let state = State {
            id: new_state_id(plan.started_at)?,
            started_at: plan.started_at,
            ended_at: Utc::now(),
            applied_resources: plan.apply,
            deleted_resources: plan.delete,
        };
        if self.persist {
            for repo in &self.states {
                repo.store_state(&state).await.context("storing run state")?;
            }
        } else {
            debug!(id = %state.id, "state not persisted");
        }

        histogram!("kahoy_run_duration_ms", clock.elapsed().as_secs_f64() * 1000.0);
        info!(
            id = %state.id,
            applied = state.applied_resources.len(),
            deleted = state.deleted_resources.len(),
            "run finished"
        );
        Ok(state)
    }

    pub async fn run(&self) -> Result<State> {
        let plan = self.prepare().await?;
        self.execute(plan).await
    }
}

fn fs_loader(path: &std::path::Path, opts: &ApplyOptions, app_config: &AppConfig) -> Result<Arc<dyn RepositoryLoader>> {
    if path.as_os_str() == STDIN_PATH {
        let cfg = StreamLoaderConfig {
            group_id: DEFAULT_ROOT_GROUP_ID.to_string(),
            timeout: opts.stream_timeout,
            app_config: app_config.clone(),
        };
        return Ok(Arc::new(StreamLoader::stdin(cfg)));
    }
    let cfg = FsLoaderConfig {
        root: path.to_path_buf(),
        default_group_id: DEFAULT_ROOT_GROUP_ID.to_string(),
        exclude_regex: opts.fs_exclude.clone(),
        include_regex: opts.fs_include.clone(),
        app_config: app_config.clone(),
    };
    Ok(Arc::new(FsLoader::new(Arc::new(OsFilesystem), cfg)?))
}
