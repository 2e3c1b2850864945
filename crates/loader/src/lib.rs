//! Kahoy loaders: turn a manifest tree (directory, git commit pair or byte
//! stream) into an in-memory resource/group repository.

#![forbid(unsafe_code)]

pub mod fs;
pub mod git;
pub mod stream;

pub use fs::{FileEntry, Filesystem, FsLoader, FsLoaderConfig, MemoryFilesystem, OsFilesystem, PathFilter};
pub use git::{GitSnapshot, GitSnapshotConfig};
pub use stream::{StreamLoader, StreamLoaderConfig, DEFAULT_STREAM_TIMEOUT, STDIN_MANIFEST_PATH};
