//! Application configuration (`kahoy.yml`, schema `v1`).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::Error;

pub const CONFIG_VERSION_V1: &str = "v1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub id: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub wait: Option<WaitConfig>,
    #[serde(default)]
    pub hooks: Option<HooksConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitConfig {
    #[serde(default, deserialize_with = "opt_duration")]
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HooksConfig {
    #[serde(default)]
    pub pre: Option<HookConfig>,
    #[serde(default)]
    pub post: Option<HookConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookConfig {
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default, deserialize_with = "opt_duration")]
    pub timeout: Option<Duration>,
}

fn opt_duration<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Duration>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => humantime::parse_duration(s.trim()).map(Some).map_err(serde::de::Error::custom),
    }
}

impl AppConfig {
    /// Configuration used when no file is present.
    pub fn default_v1() -> Self {
        Self { version: CONFIG_VERSION_V1.to_string(), groups: Vec::new() }
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let cfg: AppConfig = serde_yaml::from_str(raw).map_err(|e| Error::not_valid(format!("invalid app config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `path`. A missing file yields the default config unless `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                debug!(path = %path.display(), "app config not found; using defaults");
                return Ok(Self::default_v1());
            }
            Err(e) => return Err(Error::fs(format!("reading app config {}", path.display()), e).into()),
        };
        Self::from_yaml(&raw).with_context(|| format!("loading app config {}", path.display()))
    }

    pub fn group(&self, id: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.id == id)
    }

    fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION_V1 {
            return Err(Error::not_valid(format!("unknown app config version {:?}", self.version)).into());
        }
        let mut seen = HashSet::new();
        for g in &self.groups {
            if g.id.trim().is_empty() {
                return Err(Error::not_valid("group id can't be empty").into());
            }
            if !seen.insert(g.id.as_str()) {
                return Err(Error::not_valid(format!("group {:?} configured more than once", g.id)).into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error_kind, ErrorKind};

    #[test]
    fn parses_full_v1() {
        let raw = r#"
version: v1
groups:
  - id: crd
    priority: 200
    wait: { duration: 5s }
  - id: apps/backend
    hooks:
      pre:  { cmd: ["./check.sh", "--strict"], timeout: 1m30s }
      post: { cmd: ["notify"] }
"#;
        let cfg = AppConfig::from_yaml(raw).unwrap();
        assert_eq!(cfg.groups.len(), 2);
        let crd = cfg.group("crd").unwrap();
        assert_eq!(crd.priority, Some(200));
        assert_eq!(crd.wait.as_ref().unwrap().duration, Some(Duration::from_secs(5)));
        let hooks = cfg.group("apps/backend").unwrap().hooks.as_ref().unwrap();
        assert_eq!(hooks.pre.as_ref().unwrap().timeout, Some(Duration::from_secs(90)));
        assert_eq!(hooks.post.as_ref().unwrap().cmd, vec!["notify"]);
    }

    #[test]
    fn unknown_version_is_not_valid() {
        let err = AppConfig::from_yaml("version: v2\n").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotValid));
    }

    #[test]
    fn empty_group_id_is_not_valid() {
        let err = AppConfig::from_yaml("version: v1\ngroups:\n  - id: \"\"\n").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotValid));
    }

    #[test]
    fn missing_optional_file_uses_defaults() {
        let cfg = AppConfig::load(Path::new("/definitely/not/here/kahoy.yml"), false).unwrap();
        assert_eq!(cfg, AppConfig::default_v1());
        let err = AppConfig::load(Path::new("/definitely/not/here/kahoy.yml"), true).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Filesystem));
    }
}
