//! External command execution.
//!
//! Every subprocess kahoy starts (`kubectl`, `diff`, hooks) goes through a
//! [`CmdRunner`]. The production runner spawns with `kill_on_drop(true)`, so
//! dropping an in-flight future (timeouts, cancellation) kills the child.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kahoy_core::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment.
    pub envs: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self { Self { program: program.into(), ..Default::default() } }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.envs.push((k.into(), v.into()));
        self
    }

    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// `program arg1 arg2`, for logs and errors.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str)).collect::<Vec<_>>().join(" ")
    }

    fn command(&self) -> Command {
        let mut c = Command::new(&self.program);
        c.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if self.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        c
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CmdOutput {
    pub fn success(&self) -> bool { self.code == Some(0) }

    pub fn stdout_str(&self) -> String { String::from_utf8_lossy(&self.stdout).into_owned() }

    pub fn stderr_str(&self) -> String { String::from_utf8_lossy(&self.stderr).into_owned() }

    pub fn into_error(self, cmd: &Cmd) -> Error {
        Error::External { cmd: cmd.display(), code: self.code, stderr: self.stderr_str().trim().to_string() }
    }
}

pub type LineSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait CmdRunner: Send + Sync {
    /// Run to completion capturing stdout and stderr separately.
    async fn output(&self, cmd: &Cmd) -> Result<CmdOutput>;
    /// Run to completion sending stdout and stderr lines to `on_line` as they arrive.
    async fn stream(&self, cmd: &Cmd, on_line: LineSink<'_>) -> Result<Option<i32>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    fn spawn(cmd: &Cmd) -> Result<tokio::process::Child> {
        cmd.command().spawn().map_err(|e| {
            Error::External { cmd: cmd.display(), code: None, stderr: format!("spawn failed: {}", e) }.into()
        })
    }

    /// Feed stdin from a separate task so a chatty child can't deadlock on a full pipe.
    fn feed_stdin(child: &mut tokio::process::Child, cmd: &Cmd) -> Option<tokio::task::JoinHandle<()>> {
        let data = cmd.stdin.clone()?;
        let mut stdin = child.stdin.take()?;
        Some(tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&data).await {
                debug!(error = %e, "child closed stdin early");
            }
        }))
    }
}

#[async_trait]
impl CmdRunner for ProcessRunner {
    async fn output(&self, cmd: &Cmd) -> Result<CmdOutput> {
        debug!(cmd = %cmd.display(), "running command");
        let mut child = Self::spawn(cmd)?;
        let writer = Self::feed_stdin(&mut child, cmd);
        let out = child.wait_with_output().await.with_context(|| format!("waiting for {}", cmd.program))?;
        if let Some(w) = writer { let _ = w.await; }
        Ok(CmdOutput { code: out.status.code(), stdout: out.stdout, stderr: out.stderr })
    }

    async fn stream(&self, cmd: &Cmd, on_line: LineSink<'_>) -> Result<Option<i32>> {
        debug!(cmd = %cmd.display(), "streaming command");
        let mut child = Self::spawn(cmd)?;
        let writer = Self::feed_stdin(&mut child, cmd);
        let stdout = child.stdout.take().context("child stdout not captured")?;
        let stderr = child.stderr.take().context("child stderr not captured")?;
        let mut out = BufReader::new(stdout).lines();
        let mut err = BufReader::new(stderr).lines();
        let (mut out_done, mut err_done) = (false, false);
        while !(out_done && err_done) {
            tokio::select! {
                line = out.next_line(), if !out_done => match line.context("reading stdout")? {
                    Some(l) => on_line(&l),
                    None => out_done = true,
                },
                line = err.next_line(), if !err_done => match line.context("reading stderr")? {
                    Some(l) => on_line(&l),
                    None => err_done = true,
                },
            }
        }
        let status = child.wait().await.with_context(|| format!("waiting for {}", cmd.program))?;
        if let Some(w) = writer { let _ = w.await; }
        Ok(status.code())
    }
}
