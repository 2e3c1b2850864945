//! Canonical resource identities and group construction.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::{Error, Group, GroupHooks, GroupWait, HookSpec, K8sObject, Resource, DEFAULT_GROUP_PRIORITY};

/// `<group>/<version>/<Kind>/<namespace>/<name>` with `core` and `default` fill-ins.
pub fn resource_id(obj: &K8sObject) -> Result<String, Error> {
    let (group, version) = obj.group_version();
    if version.is_empty() {
        return Err(Error::not_valid("object missing apiVersion"));
    }
    if obj.kind().is_empty() {
        return Err(Error::not_valid(format!("object {} missing kind", obj.api_version())));
    }
    if obj.name().is_empty() {
        return Err(Error::not_valid(format!("{} {} missing metadata.name", obj.api_version(), obj.kind())));
    }
    let group = if group.is_empty() { "core" } else { group };
    let ns = if obj.namespace().is_empty() { "default" } else { obj.namespace() };
    Ok(format!("{}/{}/{}/{}/{}", group, version, obj.kind(), ns, obj.name()))
}

/// `<group>/<version>/<Kind>`, group omitted for the core API (`v1/Pod`).
pub fn kube_type(obj: &K8sObject) -> String {
    let (group, version) = obj.group_version();
    if group.is_empty() {
        format!("{}/{}", version, obj.kind())
    } else {
        format!("{}/{}/{}", group, version, obj.kind())
    }
}

pub const MAX_LABEL_LEN: usize = 63;

/// `[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?`, the name part of label keys and
/// non-empty label values.
pub fn is_qualified_name(s: &str) -> bool {
    let edge = |c: char| c.is_ascii_alphanumeric();
    s.starts_with(edge) && s.ends_with(edge) && s.chars().all(|c| edge(c) || matches!(c, '-' | '_' | '.'))
}

/// Empty, or a qualified name of at most 63 characters.
pub fn is_valid_label_value(v: &str) -> bool { v.is_empty() || (v.len() <= MAX_LABEL_LEN && is_qualified_name(v)) }

pub fn new_resource(obj: K8sObject, group_id: &str, manifest_path: &str) -> Result<Resource, Error> {
    let id = resource_id(&obj)?;
    Ok(Resource {
        id,
        name: obj.name().to_string(),
        group_id: group_id.to_string(),
        manifest_path: manifest_path.to_string(),
        k8s_object: Arc::new(obj),
    })
}

/// Build a group, taking priority/wait/hooks from the app config when it names the group.
pub fn new_group(id: &str, path: &str, cfg: &AppConfig) -> Group {
    let mut group = Group {
        id: id.to_string(),
        path: path.to_string(),
        priority: DEFAULT_GROUP_PRIORITY,
        wait: GroupWait::default(),
        hooks: GroupHooks::default(),
    };
    let Some(gc) = cfg.group(id) else { return group };
    if let Some(p) = gc.priority { group.priority = p; }
    if let Some(d) = gc.wait.as_ref().and_then(|w| w.duration) { group.wait.duration = d; }
    if let Some(h) = gc.hooks.as_ref() {
        group.hooks.pre = h.pre.as_ref().map(|c| HookSpec { cmd: c.cmd.clone(), timeout: c.timeout });
        group.hooks.post = h.post.as_ref().map(|c| HookSpec { cmd: c.cmd.clone(), timeout: c.timeout });
    }
    group
}
