//! Filesystem manifest loader.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kahoy_core::config::AppConfig;
use kahoy_core::{codec, factory, Error, MemoryRepository, RepositoryLoader, DEFAULT_ROOT_GROUP_ID};
use metrics::counter;
use regex::Regex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Narrow filesystem view the loader walks. Implemented for the host
/// filesystem and in-memory trees (git commits are materialized into one).
pub trait Filesystem: Send + Sync {
    /// Every entry under `root` (recursive), in a stable order.
    fn walk(&self, root: &Path) -> Result<Vec<FileEntry>>;
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;
    fn abs(&self, path: &Path) -> Result<PathBuf>;
    fn exists(&self, path: &Path) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn walk(&self, root: &Path) -> Result<Vec<FileEntry>> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::fs(format!("walking {}", root.display()), e.into()))?;
            out.push(FileEntry { path: entry.path().to_path_buf(), is_dir: entry.file_type().is_dir() });
        }
        Ok(out)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|e| Error::fs(format!("reading {}", path.display()), e).into())
    }

    fn abs(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() { return Ok(path.to_path_buf()); }
        let cwd = std::env::current_dir().map_err(|e| Error::fs(format!("resolving {}", path.display()), e))?;
        Ok(cwd.join(path))
    }

    fn exists(&self, path: &Path) -> bool { path.exists() }
}

/// In-memory tree keyed by absolute path; directories are implied by file
/// paths or registered explicitly.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilesystem {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

impl MemoryFilesystem {
    pub fn new() -> Self { Self::default() }

    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        let path = normalize(&Path::new("/").join(path.into()));
        self.files.insert(path, content.into());
    }

    pub fn insert_dir(&mut self, path: impl Into<PathBuf>) {
        self.dirs.insert(normalize(&Path::new("/").join(path.into())));
    }
}

impl Filesystem for MemoryFilesystem {
    fn walk(&self, root: &Path) -> Result<Vec<FileEntry>> {
        let root = self.abs(root)?;
        if !self.exists(&root) {
            let e = std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory");
            return Err(Error::fs(format!("walking {}", root.display()), e).into());
        }
        Ok(self
            .files
            .keys()
            .filter(|p| p.starts_with(&root))
            .map(|p| FileEntry { path: p.clone(), is_dir: false })
            .collect())
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let path = self.abs(path)?;
        self.files.get(&path).cloned().ok_or_else(|| {
            let e = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
            Error::fs(format!("reading {}", path.display()), e).into()
        })
    }

    fn abs(&self, path: &Path) -> Result<PathBuf> { Ok(normalize(&Path::new("/").join(path))) }

    fn exists(&self, path: &Path) -> bool {
        let path = normalize(&Path::new("/").join(path));
        self.dirs.iter().any(|p| p.starts_with(&path)) || self.files.keys().any(|p| p.starts_with(&path))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => { out.pop(); }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Ordered exclude/include regex filter over manifest paths.
///
/// Exclude wins over include; with no includes configured everything not
/// excluded passes.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    exclude: Vec<Regex>,
    include: Vec<Regex>,
}

impl PathFilter {
    pub fn new<S: AsRef<str>>(exclude: &[S], include: &[S]) -> Result<Self> {
        Ok(Self { exclude: compile(exclude, "exclude")?, include: compile(include, "include")? })
    }

    pub fn allows(&self, path: &str) -> bool {
        if self.exclude.iter().any(|r| r.is_match(path)) { return false; }
        if self.include.iter().any(|r| r.is_match(path)) { return true; }
        self.include.is_empty()
    }
}

pub(crate) fn compile<S: AsRef<str>>(patterns: &[S], what: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p.as_ref()).map_err(|e| Error::not_valid(format!("invalid {} regex {:?}: {}", what, p.as_ref(), e)).into())
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct FsLoaderConfig {
    pub root: PathBuf,
    pub default_group_id: String,
    pub exclude_regex: Vec<String>,
    pub include_regex: Vec<String>,
    pub app_config: AppConfig,
}

impl FsLoaderConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_group_id: DEFAULT_ROOT_GROUP_ID.to_string(),
            exclude_regex: Vec::new(),
            include_regex: Vec::new(),
            app_config: AppConfig::default_v1(),
        }
    }
}

/// Loads every `.yaml`/`.yml` file under a root; each directory becomes a group.
pub struct FsLoader {
    fs: Arc<dyn Filesystem>,
    cfg: FsLoaderConfig,
    filter: PathFilter,
}

impl FsLoader {
    pub fn new(fs: Arc<dyn Filesystem>, cfg: FsLoaderConfig) -> Result<Self> {
        let filter = PathFilter::new(&cfg.exclude_regex, &cfg.include_regex)?;
        Ok(Self { fs, cfg, filter })
    }

    pub fn root(&self) -> &Path { &self.cfg.root }

    pub fn load_sync(&self) -> Result<MemoryRepository> {
        let root = self.fs.abs(&self.cfg.root)?;
        let mut repo = MemoryRepository::new();
        let mut files = 0u64;
        for entry in self.fs.walk(&root)? {
            if entry.is_dir || !is_manifest(&entry.path) { continue; }
            let path = self.fs.abs(&entry.path)?;
            let path_s = path.to_string_lossy().to_string();
            if !self.filter.allows(&path_s) {
                debug!(path = %path_s, "manifest filtered out");
                continue;
            }
            let parent = path.parent().unwrap_or(&root).to_path_buf();
            let group_id = self.group_id(&root, &parent);
            repo.add_group(factory::new_group(&group_id, &parent.to_string_lossy(), &self.cfg.app_config))?;

            let raw = self.fs.read_file(&path)?;
            let objs = codec::decode(&raw).with_context(|| format!("decoding {}", path_s))?;
            for obj in objs {
                let res = factory::new_resource(obj, &group_id, &path_s).with_context(|| format!("loading {}", path_s))?;
                repo.add_resource(res)?;
            }
            files += 1;
        }
        counter!("kahoy_loader_files_total", files);
        info!(root = %root.display(), files, resources = repo.len(), "manifests loaded");
        Ok(repo)
    }

    fn group_id(&self, root: &Path, dir: &Path) -> String {
        let rel = dir.strip_prefix(root).unwrap_or(dir);
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        if parts.is_empty() { self.cfg.default_group_id.clone() } else { parts.join("/") }
    }
}

#[async_trait]
impl RepositoryLoader for FsLoader {
    async fn load(&self) -> Result<MemoryRepository> { self.load_sync() }
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}
