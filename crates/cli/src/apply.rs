use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, ValueEnum};
use kahoy_api::{ApplyOptions, RunMode, Runner};
use kahoy_apply::ProcessRunner;
use kahoy_core::config::AppConfig;
use kahoy_core::Error;
use metrics::counter;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Mode {
    Git,
    Paths,
    Kubernetes,
}

impl From<Mode> for RunMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Git => RunMode::Git,
            Mode::Paths => RunMode::Paths,
            Mode::Kubernetes => RunMode::Kubernetes,
        }
    }
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Where the old manifests come from
    #[arg(short = 'm', long = "mode", value_enum, env = "KAHOY_MODE", default_value_t = Mode::Git)]
    pub mode: Mode,

    /// Old manifests path; defaults to the new path in git mode, empty in paths mode
    #[arg(short = 'o', long = "fs-old-manifests-path", env = "KAHOY_FS_OLD_MANIFESTS_PATH")]
    pub fs_old_manifests_path: Option<PathBuf>,

    /// New manifests path (`-` reads stdin)
    #[arg(short = 'n', long = "fs-new-manifests-path", env = "KAHOY_FS_NEW_MANIFESTS_PATH")]
    pub fs_new_manifests_path: PathBuf,

    /// Regex of manifest paths to ignore
    #[arg(short = 'e', long = "fs-exclude", env = "KAHOY_FS_EXCLUDE", action = ArgAction::Append)]
    pub fs_exclude: Vec<String>,

    /// Regex of manifest paths to load; everything else is ignored
    #[arg(short = 'i', long = "fs-include", env = "KAHOY_FS_INCLUDE", action = ArgAction::Append)]
    pub fs_include: Vec<String>,

    /// Regex of `group/version/Kind` types to ignore
    #[arg(short = 'a', long = "kube-exclude-type", env = "KAHOY_KUBE_EXCLUDE_TYPE", action = ArgAction::Append)]
    pub kube_exclude_type: Vec<String>,

    #[arg(short = 'l', long = "kube-labels-selector", env = "KAHOY_KUBE_LABELS_SELECTOR", default_value = "")]
    pub kube_labels_selector: String,

    #[arg(long = "kube-annotations-selector", env = "KAHOY_KUBE_ANNOTATIONS_SELECTOR", default_value = "")]
    pub kube_annotations_selector: String,

    /// Commit holding the old manifests; defaults to the merge-base with the default branch
    #[arg(long = "git-before-commit-sha", env = "KAHOY_GIT_BEFORE_COMMIT_SHA")]
    pub git_before_commit_sha: Option<String>,

    #[arg(long = "git-default-branch", env = "KAHOY_GIT_DEFAULT_BRANCH", default_value = "master")]
    pub git_default_branch: String,

    /// Only load files changed between the two commits
    #[arg(long = "git-diff-filter", env = "KAHOY_GIT_DIFF_FILTER")]
    pub git_diff_filter: bool,

    /// Storage id of the cluster state
    #[arg(long = "kube-provider-id", env = "KAHOY_KUBE_PROVIDER_ID", default_value = "default")]
    pub kube_provider_id: String,

    #[arg(long = "kube-provider-namespace", env = "KAHOY_KUBE_PROVIDER_NAMESPACE", default_value = "default")]
    pub kube_provider_namespace: String,

    #[arg(long = "kube-context", env = "KAHOY_KUBE_CONTEXT")]
    pub kube_context: Option<String>,

    #[arg(long = "kube-config", env = "KAHOY_KUBE_CONFIG")]
    pub kube_config: Option<String>,

    #[arg(long = "kubectl-path", env = "KAHOY_KUBECTL_PATH", default_value = "kubectl")]
    pub kubectl_path: String,

    #[arg(long = "kube-field-manager", env = "KAHOY_KUBE_FIELD_MANAGER")]
    pub kube_field_manager: Option<String>,

    #[arg(long = "kube-force-conflicts", env = "KAHOY_KUBE_FORCE_CONFLICTS")]
    pub kube_force_conflicts: bool,

    /// Create missing namespaces before applying
    #[arg(long = "create-namespace", env = "KAHOY_CREATE_NAMESPACE")]
    pub create_namespace: bool,

    /// Skip resources whose old and new manifests are equal
    #[arg(long = "include-changes", env = "KAHOY_INCLUDE_CHANGES")]
    pub include_changes: bool,

    #[arg(long = "dry-run", env = "KAHOY_DRY_RUN")]
    pub dry_run: bool,

    #[arg(long = "diff", env = "KAHOY_DIFF")]
    pub diff: bool,

    /// Don't ask for confirmation
    #[arg(long = "auto-approve", env = "KAHOY_AUTO_APPROVE")]
    pub auto_approve: bool,

    /// Write a JSON report of the run (`-` for stdout)
    #[arg(short = 'r', long = "report-path", env = "KAHOY_REPORT_PATH")]
    pub report_path: Option<String>,

    #[arg(long = "execution-timeout", env = "KAHOY_EXECUTION_TIMEOUT", value_parser = humantime::parse_duration)]
    pub execution_timeout: Option<Duration>,

    #[arg(long = "stream-timeout", env = "KAHOY_STREAM_TIMEOUT", value_parser = humantime::parse_duration, default_value = "10s")]
    pub stream_timeout: Duration,
}

impl ApplyArgs {
    pub fn options(&self) -> ApplyOptions {
        ApplyOptions {
            mode: self.mode.into(),
            fs_old_manifests_path: self.fs_old_manifests_path.clone(),
            fs_new_manifests_path: self.fs_new_manifests_path.clone(),
            fs_exclude: self.fs_exclude.clone(),
            fs_include: self.fs_include.clone(),
            kube_exclude_type: self.kube_exclude_type.clone(),
            kube_labels_selector: self.kube_labels_selector.clone(),
            kube_annotations_selector: self.kube_annotations_selector.clone(),
            git_before_commit_sha: self.git_before_commit_sha.clone(),
            git_default_branch: self.git_default_branch.clone(),
            git_diff_filter: self.git_diff_filter,
            kube_provider_id: self.kube_provider_id.clone(),
            kube_provider_namespace: self.kube_provider_namespace.clone(),
            kube_context: self.kube_context.clone(),
            kube_config: self.kube_config.clone(),
            kubectl_path: self.kubectl_path.clone(),
            kube_field_manager: self.kube_field_manager.clone(),
            kube_force_conflicts: self.kube_force_conflicts,
            create_namespace: self.create_namespace,
            include_changes: self.include_changes,
            dry_run: self.dry_run,
            diff: self.diff,
            report_path: self.report_path.clone(),
            execution_timeout: self.execution_timeout,
            stream_timeout: self.stream_timeout,
        }
    }
}

pub async fn run(args: ApplyArgs, app_config: AppConfig) -> Result<()> {
    let opts = args.options();
    let confirm = !args.auto_approve && opts.persists_state();
    if confirm && opts.new_from_stdin() {
        return Err(Error::not_valid("reading manifests from stdin requires --auto-approve").into());
    }

    let runner = Runner::from_options(opts, app_config, Arc::new(ProcessRunner)).await?;
    let plan = runner.prepare().await?;
    if confirm {
        if plan.is_empty() {
            eprintln!("No changes.");
        } else {
            eprint!("{}", plan.summary());
            eprint!("Type 'yes' to continue: ");
        }
        if !plan.is_empty() && !approved().await? {
            warn!("run not approved");
            counter!("kahoy_runs_total", 1u64, "result" => "rejected");
            return Ok(());
        }
    }

    let state = runner.execute(plan).await?;
    counter!("kahoy_runs_total", 1u64, "result" => "ok");
    info!(id = %state.id, "apply done");
    Ok(())
}

async fn approved() -> Result<bool> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await.context("reading confirmation")?;
    Ok(line.trim() == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrap {
        #[command(flatten)]
        args: ApplyArgs,
    }

    #[test]
    fn defaults_and_repeated_filters() {
        let w = Wrap::try_parse_from(["kahoy", "-n", "./m", "-e", "a", "-e", "b", "--mode", "paths", "--stream-timeout", "1m30s"])
            .unwrap();
        let o = w.args.options();
        assert_eq!(o.mode, RunMode::Paths);
        assert_eq!(o.fs_exclude, vec!["a", "b"]);
        assert_eq!(o.git_default_branch, "master");
        assert_eq!(o.kube_provider_id, "default");
        assert_eq!(o.kubectl_path, "kubectl");
        assert_eq!(o.stream_timeout, Duration::from_secs(90));
        assert_eq!(o.execution_timeout, None);
        assert!(!w.args.auto_approve);
    }

    #[test]
    fn regex_flags_keep_commas() {
        let w = Wrap::try_parse_from(["kahoy", "-n", "./m", "-e", "a{1,3}", "-i", ".*/(x|y),z", "-a", "v1/(Secret|ConfigMap)"])
            .unwrap();
        let o = w.args.options();
        assert_eq!(o.fs_exclude, vec!["a{1,3}"]);
        assert_eq!(o.fs_include, vec![".*/(x|y),z"]);
        assert_eq!(o.kube_exclude_type, vec!["v1/(Secret|ConfigMap)"]);
    }

    #[test]
    fn new_path_is_required() {
        assert!(Wrap::try_parse_from(["kahoy", "--mode", "git"]).is_err());
    }
}
