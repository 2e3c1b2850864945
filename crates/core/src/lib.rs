//! Kahoy core: unstructured Kubernetes objects, resources/groups, the YAML
//! codec, in-memory repositories and the application config schema.

#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
mod error;
pub mod factory;
mod model;
mod repo;

pub use error::{error_kind, Error, ErrorKind};
pub use model::{
    DesiredState, Group, GroupHooks, GroupWait, HookSpec, K8sObject, PlanState, Resource, State,
    DEFAULT_GROUP_PRIORITY, DEFAULT_ROOT_GROUP_ID,
};
pub use repo::{GroupRepository, MemoryRepository, RepositoryLoader, ResourceRepository};

pub mod prelude {
    pub use super::{
        DesiredState, Group, GroupRepository, K8sObject, MemoryRepository, PlanState, RepositoryLoader, Resource,
        ResourceRepository, State,
    };
}
