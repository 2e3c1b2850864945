//! Pre/post apply hooks declared per group.
//!
//! Hooks of one phase run concurrently. The first failure cancels the
//! remaining hooks of the phase (their processes are killed) and every task
//! is awaited before the error is returned; a failed pre phase skips the apply.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kahoy_core::{Error, GroupRepository, HookSpec, Resource};
use metrics::counter;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exec::{Cmd, CmdRunner};
use crate::{KubectlConfig, ResourceManager};

pub const ENV_KUBECTL_CMD: &str = "KAHOY_KUBECTL_CMD";
pub const ENV_KUBE_CONFIG: &str = "KAHOY_KUBE_CONFIG";
pub const ENV_KUBE_CONTEXT: &str = "KAHOY_KUBE_CONTEXT";
pub const ENV_HOOK_TYPE: &str = "KAHOY_HOOK_TYPE";
pub const ENV_HOOK_GROUP: &str = "KAHOY_HOOK_GROUP";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    Pre,
    Post,
}

impl HookType {
    pub fn as_str(self) -> &'static str {
        match self {
            HookType::Pre => "pre",
            HookType::Post => "post",
        }
    }
}

pub struct HookManager {
    inner: Arc<dyn ResourceManager>,
    groups: Arc<dyn GroupRepository>,
    runner: Arc<dyn CmdRunner>,
    cfg: KubectlConfig,
}

impl HookManager {
    pub fn new(
        inner: Arc<dyn ResourceManager>,
        groups: Arc<dyn GroupRepository>,
        runner: Arc<dyn CmdRunner>,
        cfg: KubectlConfig,
    ) -> Self {
        Self { inner, groups, runner, cfg }
    }

    fn hooks(&self, resources: &[Resource], typ: HookType) -> Result<Vec<(String, HookSpec)>> {
        let ids: BTreeSet<&str> = resources.iter().map(|r| r.group_id.as_str()).collect();
        let mut out = Vec::new();
        for id in ids {
            let g = self.groups.get_group(id)?;
            let spec = match typ {
                HookType::Pre => g.hooks.pre,
                HookType::Post => g.hooks.post,
            };
            if let Some(spec) = spec {
                if spec.cmd.is_empty() {
                    return Err(Error::not_valid(format!("group {} {} hook has an empty command", id, typ.as_str())).into());
                }
                out.push((id.to_string(), spec));
            }
        }
        Ok(out)
    }

    fn command(&self, group: &str, typ: HookType, argv: &[String]) -> Cmd {
        Cmd::new(&argv[0])
            .args(argv[1..].iter().cloned())
            .env(ENV_KUBECTL_CMD, &self.cfg.cmd)
            .env(ENV_KUBE_CONFIG, self.cfg.kube_config.clone().unwrap_or_default())
            .env(ENV_KUBE_CONTEXT, self.cfg.kube_context.clone().unwrap_or_default())
            .env(ENV_HOOK_TYPE, typ.as_str())
            .env(ENV_HOOK_GROUP, group)
    }

    async fn run_phase(&self, typ: HookType, hooks: Vec<(String, HookSpec)>) -> Result<()> {
        if hooks.is_empty() { return Ok(()); }
        info!(hook = typ.as_str(), count = hooks.len(), "running hooks");
        let token = CancellationToken::new();
        let mut set = JoinSet::new();
        for (group, spec) in hooks {
            let cmd = self.command(&group, typ, &spec.cmd);
            let runner = Arc::clone(&self.runner);
            let token = token.clone();
            set.spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(group = %group, hook = typ.as_str(), "hook cancelled");
                        Ok(())
                    }
                    res = run_hook(runner, cmd, spec, group.clone(), typ) => res,
                }
            });
        }

        let mut first: Option<anyhow::Error> = None;
        while let Some(joined) = set.join_next().await {
            let res = joined.map_err(|e| anyhow!("hook task failed: {}", e)).and_then(|r| r);
            if let Err(e) = res {
                if first.is_none() {
                    warn!(hook = typ.as_str(), error = %e, "hook failed, cancelling siblings");
                    token.cancel();
                    first = Some(e);
                }
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn run_hook(runner: Arc<dyn CmdRunner>, cmd: Cmd, spec: HookSpec, group: String, typ: HookType) -> Result<()> {
    counter!("kahoy_hook_runs_total", 1u64, "type" => typ.as_str());
    let log_line = |line: &str| info!(group = %group, hook = typ.as_str(), "{}", line);
    let fut = runner.stream(&cmd, &log_line);
    let code = match spec.timeout {
        Some(t) => tokio::time::timeout(t, fut).await.map_err(|_| {
            Error::timeout(format!("{} hook of group {} exceeded {:?}", typ.as_str(), group, t))
        })??,
        None => fut.await?,
    };
    if code != Some(0) {
        counter!("kahoy_hook_failures_total", 1u64, "type" => typ.as_str());
        return Err(Error::External { cmd: cmd.display(), code, stderr: format!("{} hook of group {} failed", typ.as_str(), group) }.into());
    }
    Ok(())
}

#[async_trait]
impl ResourceManager for HookManager {
    async fn apply(&self, resources: &[Resource]) -> Result<()> {
        let pre = self.hooks(resources, HookType::Pre)?;
        let post = self.hooks(resources, HookType::Post)?;
        self.run_phase(HookType::Pre, pre).await?;
        self.inner.apply(resources).await?;
        self.run_phase(HookType::Post, post).await
    }

    async fn delete(&self, resources: &[Resource]) -> Result<()> { self.inner.delete(resources).await }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::testutil::*;
    use kahoy_core::config::AppConfig;
    use kahoy_core::{error_kind, factory, ErrorKind, GroupHooks, MemoryRepository};

    /// Behaviour keyed by program name: `ok`, `fail` or `sleep`.
    #[derive(Default)]
    struct ScriptRunner {
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CmdRunner for ScriptRunner {
        async fn output(&self, _cmd: &Cmd) -> Result<crate::exec::CmdOutput> { unreachable!("hooks stream") }

        async fn stream(&self, cmd: &Cmd, on_line: crate::exec::LineSink<'_>) -> Result<Option<i32>> {
            let group = cmd.envs.iter().find(|(k, _)| k == ENV_HOOK_GROUP).map(|(_, v)| v.clone()).unwrap();
            self.log.lock().unwrap().push(format!("start {} {}", cmd.program, group));
            on_line("output");
            let code = match cmd.program.as_str() {
                "fail" => Some(1),
                "sleep" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Some(0)
                }
                _ => Some(0),
            };
            self.log.lock().unwrap().push(format!("end {} {}", cmd.program, group));
            Ok(code)
        }
    }

    fn hook(program: &str, timeout: Option<Duration>) -> Option<HookSpec> {
        Some(HookSpec { cmd: vec![program.to_string(), "arg".to_string()], timeout })
    }

    fn groups(specs: Vec<(&str, GroupHooks)>) -> Arc<dyn GroupRepository> {
        let mut repo = MemoryRepository::new();
        for (id, hooks) in specs {
            let mut g = factory::new_group(id, &format!("/m/{}", id), &AppConfig::default_v1());
            g.hooks = hooks;
            repo.add_group(g).unwrap();
        }
        Arc::new(repo)
    }

    #[tokio::test]
    async fn pre_apply_post_ordering_with_env() {
        let runner = Arc::new(FakeRunner::default());
        let rec = Arc::new(Recorder::default());
        let cfg = KubectlConfig { kube_context: Some("ctx".into()), ..Default::default() };
        let gs = groups(vec![("g", GroupHooks { pre: hook("ok", None), post: hook("ok", None) })]);
        let m = HookManager::new(rec.clone(), gs, runner.clone(), cfg);
        m.apply(&[res("Pod", "ns", "a", "g")]).await.unwrap();

        let seen = runner.seen();
        assert_eq!(seen.len(), 2);
        let env = |c: &Cmd, k: &str| c.envs.iter().find(|(ek, _)| ek == k).map(|(_, v)| v.clone()).unwrap();
        assert_eq!(env(&seen[0], ENV_HOOK_TYPE), "pre");
        assert_eq!(env(&seen[1], ENV_HOOK_TYPE), "post");
        assert_eq!(env(&seen[0], ENV_HOOK_GROUP), "g");
        assert_eq!(env(&seen[0], ENV_KUBECTL_CMD), "kubectl");
        assert_eq!(env(&seen[0], ENV_KUBE_CONTEXT), "ctx");
        assert_eq!(env(&seen[0], ENV_KUBE_CONFIG), "");
        assert_eq!(seen[0].display(), "ok arg");
        assert_eq!(rec.calls().len(), 1);
    }

    #[tokio::test]
    async fn failing_pre_hook_cancels_siblings_and_skips_apply() {
        let runner = Arc::new(ScriptRunner::default());
        let rec = Arc::new(Recorder::default());
        let gs = groups(vec![
            ("a", GroupHooks { pre: hook("fail", None), post: hook("ok", None) }),
            ("b", GroupHooks { pre: hook("sleep", None), post: None }),
        ]);
        let m = HookManager::new(rec.clone(), gs, runner.clone(), KubectlConfig::default());
        let started = std::time::Instant::now();
        let err = m.apply(&[res("Pod", "ns", "x", "a"), res("Pod", "ns", "y", "b")]).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(error_kind(&err), Some(ErrorKind::External));
        assert!(rec.calls().is_empty());
        let log = runner.log.lock().unwrap().clone();
        assert!(!log.contains(&"end sleep b".to_string()));
        assert!(!log.iter().any(|l| l.starts_with("start ok")));
    }

    #[tokio::test]
    async fn failed_apply_skips_post_hooks() {
        let runner = Arc::new(FakeRunner::default());
        let rec = Arc::new(Recorder { fail_apply: true, ..Default::default() });
        let gs = groups(vec![("g", GroupHooks { pre: None, post: hook("ok", None) })]);
        let m = HookManager::new(rec, gs, runner.clone(), KubectlConfig::default());
        assert!(m.apply(&[res("Pod", "ns", "a", "g")]).await.is_err());
        assert!(runner.seen().is_empty());
    }

    #[tokio::test]
    async fn hook_timeout() {
        let runner = Arc::new(ScriptRunner::default());
        let gs = groups(vec![("g", GroupHooks { pre: hook("sleep", Some(Duration::from_millis(20))), post: None })]);
        let m = HookManager::new(Arc::new(Recorder::default()), gs, runner, KubectlConfig::default());
        let err = m.apply(&[res("Pod", "ns", "a", "g")]).await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn empty_command_is_not_valid() {
        let gs = groups(vec![("g", GroupHooks { pre: Some(HookSpec { cmd: vec![], timeout: None }), post: None })]);
        let runner = Arc::new(FakeRunner::default());
        let m = HookManager::new(Arc::new(Recorder::default()), gs, runner.clone(), KubectlConfig::default());
        let err = m.apply(&[res("Pod", "ns", "a", "g")]).await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotValid));
        assert!(runner.seen().is_empty());
    }
}
