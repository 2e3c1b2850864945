//! Git snapshot loader: OLD and NEW manifest trees read from two commits of
//! the same repository.
//!
//! Both commits are materialized from the object database into in-memory
//! trees rooted at the repository workdir, so the worktree on disk is never
//! touched and include/exclude regexes see the same absolute paths they would
//! see on a real checkout.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use git2::{BranchType, Commit, ObjectType, Oid, Repository, Tree, TreeWalkMode, TreeWalkResult};
use kahoy_core::config::AppConfig;
use kahoy_core::{Error, DEFAULT_ROOT_GROUP_ID};
use tracing::{debug, info};

use crate::fs::{FsLoader, FsLoaderConfig, MemoryFilesystem};

const SYMLINK_MODE: i32 = 0o120000;

#[derive(Debug, Clone)]
pub struct GitSnapshotConfig {
    /// Any path inside the repository (discovered upwards).
    pub repo_path: PathBuf,
    pub old_manifests_path: PathBuf,
    pub new_manifests_path: PathBuf,
    /// Commit to diff against; when unset the merge-base with `default_branch` is used.
    pub before_commit: Option<String>,
    pub default_branch: String,
    /// Restrict loading to files changed between the two commits.
    pub diff_include_filter: bool,
    pub default_group_id: String,
    pub exclude_regex: Vec<String>,
    pub include_regex: Vec<String>,
    pub app_config: AppConfig,
}

impl GitSnapshotConfig {
    pub fn new(repo_path: impl Into<PathBuf>, old: impl Into<PathBuf>, new: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            old_manifests_path: old.into(),
            new_manifests_path: new.into(),
            before_commit: None,
            default_branch: "master".to_string(),
            diff_include_filter: false,
            default_group_id: DEFAULT_ROOT_GROUP_ID.to_string(),
            exclude_regex: Vec::new(),
            include_regex: Vec::new(),
            app_config: AppConfig::default_v1(),
        }
    }
}

/// Resolved OLD/NEW views plus the commits they were taken from.
pub struct GitSnapshot {
    pub before_commit: String,
    pub head_commit: String,
    /// Repo-relative paths touched between the two commits.
    pub changed_files: Vec<String>,
    old: Arc<FsLoader>,
    new: Arc<FsLoader>,
}

impl GitSnapshot {
    pub fn open(cfg: GitSnapshotConfig) -> Result<Self> {
        let repo = Repository::discover(&cfg.repo_path)
            .with_context(|| format!("opening git repository at {}", cfg.repo_path.display()))?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| Error::not_valid("git repository has no worktree"))?
            .to_path_buf();
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let head = repo.head().context("resolving HEAD")?;
        let head_branch = if head.is_branch() { head.shorthand().map(str::to_string) } else { None };
        let head_commit = head.peel_to_commit().context("resolving HEAD commit")?;

        let before = match cfg.before_commit.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(sha) => repo
                .revparse_single(sha.trim())
                .and_then(|o| o.peel_to_commit())
                .map_err(|e| Error::not_valid(format!("before commit {}: {}", sha, e)))?,
            None => {
                if head_branch.as_deref() == Some(cfg.default_branch.as_str()) {
                    return Err(Error::not_valid(format!(
                        "HEAD is the default branch {:?}; a before commit SHA is required",
                        cfg.default_branch
                    ))
                    .into());
                }
                let base = default_branch_commit(&repo, &cfg.default_branch)?;
                let oid = repo
                    .merge_base(head_commit.id(), base.id())
                    .with_context(|| format!("merge-base of HEAD and {}", cfg.default_branch))?;
                repo.find_commit(oid)?
            }
        };
        if before.id() == head_commit.id() {
            return Err(Error::not_valid(format!("old and new revisions are the same commit ({})", before.id())).into());
        }
        info!(before = %before.id(), head = %head_commit.id(), "git revisions resolved");

        let old_rel = relative_to(&workdir, &cfg.old_manifests_path)?;
        let new_rel = relative_to(&workdir, &cfg.new_manifests_path)?;
        let old_tree = before.tree()?;
        let new_tree = head_commit.tree()?;
        ensure_path(&old_tree, &old_rel, &before)?;
        ensure_path(&new_tree, &new_rel, &head_commit)?;

        let changed_files = changed_files(&repo, &old_tree, &new_tree)?;
        let mut include = cfg.include_regex.clone();
        if cfg.diff_include_filter {
            debug!(files = changed_files.len(), "adding git diff include filter");
            include.extend(changed_files.iter().map(|p| diff_include_regex(p)));
        }

        let old_fs = materialize(&repo, &old_tree, &workdir, &old_rel)?;
        let new_fs = materialize(&repo, &new_tree, &workdir, &new_rel)?;
        let loader = |fs: MemoryFilesystem, rel: &Path| -> Result<Arc<FsLoader>> {
            let lcfg = FsLoaderConfig {
                root: workdir.join(rel),
                default_group_id: cfg.default_group_id.clone(),
                exclude_regex: cfg.exclude_regex.clone(),
                include_regex: include.clone(),
                app_config: cfg.app_config.clone(),
            };
            Ok(Arc::new(FsLoader::new(Arc::new(fs), lcfg)?))
        };

        Ok(Self {
            before_commit: before.id().to_string(),
            head_commit: head_commit.id().to_string(),
            changed_files,
            old: loader(old_fs, &old_rel)?,
            new: loader(new_fs, &new_rel)?,
        })
    }

    pub fn old_loader(&self) -> Arc<FsLoader> { Arc::clone(&self.old) }

    pub fn new_loader(&self) -> Arc<FsLoader> { Arc::clone(&self.new) }
}

/// `.*\/<path>$` with `/` written as `\/`.
pub fn diff_include_regex(path: &str) -> String {
    format!(r".*\/{}$", regex::escape(path).replace('/', r"\/"))
}

/// The local branch wins; `origin/<branch>` only covers checkouts without one.
fn default_branch_commit<'r>(repo: &'r Repository, branch: &str) -> Result<Commit<'r>> {
    if let Ok(b) = repo.find_branch(branch, BranchType::Local) {
        return Ok(b.get().peel_to_commit()?);
    }
    let b = repo
        .find_branch(&format!("origin/{}", branch), BranchType::Remote)
        .map_err(|e| Error::not_valid(format!("default branch {:?} not found: {}", branch, e)))?;
    Ok(b.get().peel_to_commit()?)
}

fn relative_to(workdir: &Path, path: &Path) -> Result<PathBuf> {
    let abs = if path.is_absolute() { path.to_path_buf() } else { std::env::current_dir()?.join(path) };
    let abs = abs.canonicalize().unwrap_or(abs);
    let rel = abs
        .strip_prefix(workdir)
        .map_err(|_| Error::not_valid(format!("{} is outside the git repository {}", path.display(), workdir.display())))?;
    Ok(rel.components().filter(|c| matches!(c, Component::Normal(_))).collect())
}

fn ensure_path(tree: &Tree<'_>, rel: &Path, commit: &Commit<'_>) -> Result<()> {
    if rel.as_os_str().is_empty() { return Ok(()); }
    tree.get_path(rel).map_err(|e| {
        Error::not_valid(format!("manifests path {} missing at commit {}: {}", rel.display(), commit.id(), e))
    })?;
    Ok(())
}

fn changed_files(repo: &Repository, old: &Tree<'_>, new: &Tree<'_>) -> Result<Vec<String>> {
    let diff = repo.diff_tree_to_tree(Some(old), Some(new), None).context("diffing git trees")?;
    let mut files = BTreeSet::new();
    for delta in diff.deltas() {
        for p in [delta.old_file().path(), delta.new_file().path()].into_iter().flatten() {
            files.insert(p.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(files.into_iter().collect())
}

/// Read every blob under `rel` into a memory tree rooted at `workdir`.
fn materialize(repo: &Repository, tree: &Tree<'_>, workdir: &Path, rel: &Path) -> Result<MemoryFilesystem> {
    let mut blobs: Vec<(PathBuf, Oid)> = Vec::new();
    tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
        if entry.kind() != Some(ObjectType::Blob) || entry.filemode() == SYMLINK_MODE {
            return TreeWalkResult::Ok;
        }
        if let Some(name) = entry.name() {
            let p = Path::new(dir).join(name);
            if p.starts_with(rel) { blobs.push((p, entry.id())); }
        }
        TreeWalkResult::Ok
    })
    .context("walking git tree")?;

    let mut fs = MemoryFilesystem::new();
    for (p, oid) in blobs {
        let blob = repo.find_blob(oid).with_context(|| format!("reading blob {}", p.display()))?;
        fs.insert(workdir.join(&p), blob.content().to_vec());
    }
    fs.insert_dir(workdir.join(rel));
    Ok(fs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_regex_escapes_slashes() {
        let r = diff_include_regex("manifests/app/dep.yaml");
        assert_eq!(r, r".*\/manifests\/app\/dep\.yaml$");
        let re = regex::Regex::new(&r).unwrap();
        assert!(re.is_match("/repo/manifests/app/dep.yaml"));
        assert!(!re.is_match("/repo/manifests/app/dep_yaml"));
        assert!(!re.is_match("/repo/other/manifests/app/dep.yaml.bak"));
    }
}
