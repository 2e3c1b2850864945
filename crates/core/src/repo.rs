//! In-memory resource and group repositories.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{Error, Group, Resource};

pub trait ResourceRepository: Send + Sync {
    fn get_resource(&self, id: &str) -> Result<Resource, Error>;
    /// Snapshot sorted by id.
    fn list_resources(&self) -> Vec<Resource>;
}

pub trait GroupRepository: Send + Sync {
    fn get_group(&self, id: &str) -> Result<Group, Error>;
    /// Snapshot sorted by id.
    fn list_groups(&self) -> Vec<Group>;
}

/// Resources and groups of one loaded manifest tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    resources: BTreeMap<String, Resource>,
    groups: BTreeMap<String, Group>,
}

impl MemoryRepository {
    pub fn new() -> Self { Self::default() }

    /// Insert a resource; its id must be unique within the repository.
    pub fn add_resource(&mut self, res: Resource) -> Result<(), Error> {
        if let Some(prev) = self.resources.get(&res.id) {
            return Err(Error::not_valid(format!(
                "resource {} declared twice ({} and {})",
                res.id, prev.manifest_path, res.manifest_path
            )));
        }
        self.resources.insert(res.id.clone(), res);
        Ok(())
    }

    /// Insert a group. Re-adding the same id with the same path is a no-op;
    /// a different path for an existing id is a collision.
    pub fn add_group(&mut self, group: Group) -> Result<(), Error> {
        if let Some(prev) = self.groups.get(&group.id) {
            if prev.path != group.path {
                return Err(Error::not_valid(format!(
                    "group {} resolves from two paths ({} and {})",
                    group.id, prev.path, group.path
                )));
            }
            return Ok(());
        }
        self.groups.insert(group.id.clone(), group);
        Ok(())
    }

    pub fn has_group(&self, id: &str) -> bool { self.groups.contains_key(id) }

    pub fn len(&self) -> usize { self.resources.len() }

    pub fn is_empty(&self) -> bool { self.resources.is_empty() }
}

impl ResourceRepository for MemoryRepository {
    fn get_resource(&self, id: &str) -> Result<Resource, Error> {
        self.resources.get(id).cloned().ok_or_else(|| Error::missing(format!("resource {}", id)))
    }

    fn list_resources(&self) -> Vec<Resource> { self.resources.values().cloned().collect() }
}

impl GroupRepository for MemoryRepository {
    fn get_group(&self, id: &str) -> Result<Group, Error> {
        self.groups.get(id).cloned().ok_or_else(|| Error::missing(format!("group {}", id)))
    }

    fn list_groups(&self) -> Vec<Group> { self.groups.values().cloned().collect() }
}

/// A source of one manifest snapshot (filesystem, git worktree, stream, cluster state).
#[async_trait]
pub trait RepositoryLoader: Send + Sync {
    async fn load(&self) -> anyhow::Result<MemoryRepository>;
}
