//! Options of an `apply` run, independent of how the frontend parses them.

use std::path::PathBuf;
use std::time::Duration;

use kahoy_core::Error;
use kahoy_loader::DEFAULT_STREAM_TIMEOUT;

/// Where the OLD snapshot comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    /// OLD and NEW are trees at two git commits.
    #[default]
    Git,
    /// OLD and NEW are two directories on disk.
    Paths,
    /// OLD is the state stored in the cluster by a previous run.
    Kubernetes,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Git => "git",
            RunMode::Paths => "paths",
            RunMode::Kubernetes => "kubernetes",
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git" => Ok(RunMode::Git),
            "paths" => Ok(RunMode::Paths),
            "kubernetes" => Ok(RunMode::Kubernetes),
            other => Err(Error::not_valid(format!("unknown mode {:?}", other))),
        }
    }
}

pub const STDIN_PATH: &str = "-";

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub mode: RunMode,
    pub fs_old_manifests_path: Option<PathBuf>,
    /// `-` reads the NEW manifests from stdin.
    pub fs_new_manifests_path: PathBuf,
    pub fs_exclude: Vec<String>,
    pub fs_include: Vec<String>,
    pub kube_exclude_type: Vec<String>,
    pub kube_labels_selector: String,
    pub kube_annotations_selector: String,
    pub git_before_commit_sha: Option<String>,
    pub git_default_branch: String,
    pub git_diff_filter: bool,
    pub kube_provider_id: String,
    pub kube_provider_namespace: String,
    pub kube_context: Option<String>,
    pub kube_config: Option<String>,
    pub kubectl_path: String,
    pub kube_field_manager: Option<String>,
    pub kube_force_conflicts: bool,
    pub create_namespace: bool,
    pub include_changes: bool,
    pub dry_run: bool,
    pub diff: bool,
    /// `-` is stdout.
    pub report_path: Option<String>,
    pub execution_timeout: Option<Duration>,
    pub stream_timeout: Duration,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Git,
            fs_old_manifests_path: None,
            fs_new_manifests_path: PathBuf::new(),
            fs_exclude: Vec::new(),
            fs_include: Vec::new(),
            kube_exclude_type: Vec::new(),
            kube_labels_selector: String::new(),
            kube_annotations_selector: String::new(),
            git_before_commit_sha: None,
            git_default_branch: "master".to_string(),
            git_diff_filter: false,
            kube_provider_id: "default".to_string(),
            kube_provider_namespace: "default".to_string(),
            kube_context: None,
            kube_config: None,
            kubectl_path: "kubectl".to_string(),
            kube_field_manager: None,
            kube_force_conflicts: false,
            create_namespace: false,
            include_changes: false,
            dry_run: false,
            diff: false,
            report_path: None,
            execution_timeout: None,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }
}

impl ApplyOptions {
    pub fn new_from_stdin(&self) -> bool { self.fs_new_manifests_path.as_os_str() == STDIN_PATH }

    /// Dry-run and diff runs touch nothing and record nothing.
    pub fn persists_state(&self) -> bool { !self.dry_run && !self.diff }

    pub fn validate(&self) -> Result<(), Error> {
        if self.fs_new_manifests_path.as_os_str().is_empty() {
            return Err(Error::not_valid("new manifests path is required"));
        }
        if self.dry_run && self.diff {
            return Err(Error::not_valid("dry-run and diff are mutually exclusive"));
        }
        if self.kubectl_path.trim().is_empty() {
            return Err(Error::not_valid("kubectl path is empty"));
        }
        if self.new_from_stdin() && self.mode == RunMode::Git {
            return Err(Error::not_valid("git mode can't read the new manifests from stdin"));
        }
        if self.fs_old_manifests_path.as_deref().map(|p| p.as_os_str() == STDIN_PATH).unwrap_or(false) {
            return Err(Error::not_valid("old manifests can't be read from stdin"));
        }
        if self.mode == RunMode::Kubernetes && self.kube_provider_namespace.is_empty() {
            return Err(Error::not_valid("kubernetes mode needs a storage namespace"));
        }
        if self.execution_timeout == Some(Duration::ZERO) {
            return Err(Error::not_valid("execution timeout must be positive"));
        }
        Ok(())
    }
}
