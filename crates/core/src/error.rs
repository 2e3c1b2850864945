//! Error categories shared by every kahoy crate.
//!
//! Library code returns `anyhow::Result` and wraps failures with context; the
//! category travels as a [`Error`] somewhere in the chain and is recovered with
//! [`error_kind`].

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not valid: {0}")]
    NotValid(String),
    #[error("missing: {0}")]
    Missing(String),
    #[error("filesystem: {context}")]
    Filesystem {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("external command {cmd} failed (exit {code:?}): {stderr}")]
    External { cmd: String, code: Option<i32>, stderr: String },
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("protocol: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotValid,
    Missing,
    Filesystem,
    External,
    Timeout,
    Protocol,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotValid(_) => ErrorKind::NotValid,
            Error::Missing(_) => ErrorKind::Missing,
            Error::Filesystem { .. } => ErrorKind::Filesystem,
            Error::External { .. } => ErrorKind::External,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Protocol(_) => ErrorKind::Protocol,
        }
    }

    pub fn not_valid(msg: impl Into<String>) -> Self { Error::NotValid(msg.into()) }
    pub fn missing(msg: impl Into<String>) -> Self { Error::Missing(msg.into()) }
    pub fn timeout(msg: impl Into<String>) -> Self { Error::Timeout(msg.into()) }
    pub fn protocol(msg: impl Into<String>) -> Self { Error::Protocol(msg.into()) }

    pub fn fs(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Filesystem { context: context.into(), source }
    }
}

/// Outermost categorized error in the chain, if any.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain().find_map(|e| e.downcast_ref::<Error>().map(Error::kind))
}
