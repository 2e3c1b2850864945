//! Resource, group, plan and run-state types.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::Error;

pub const DEFAULT_GROUP_PRIORITY: i32 = 1000;
pub const DEFAULT_ROOT_GROUP_ID: &str = "root";

/// Schema-less Kubernetes object. Always a JSON object at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct K8sObject(Map<String, Json>);

impl K8sObject {
    pub fn from_value(v: Json) -> Result<Self, Error> {
        match v {
            Json::Object(map) => Ok(Self(map)),
            other => Err(Error::protocol(format!("kubernetes object must be a mapping, got {}", json_type(&other)))),
        }
    }

    pub fn as_map(&self) -> &Map<String, Json> { &self.0 }

    pub fn to_value(&self) -> Json { Json::Object(self.0.clone()) }

    pub fn get(&self, key: &str) -> Option<&Json> { self.0.get(key) }

    pub fn api_version(&self) -> &str { self.str_field("apiVersion") }

    pub fn kind(&self) -> &str { self.str_field("kind") }

    /// `(group, version)` split of `apiVersion`; group is empty for the core API.
    pub fn group_version(&self) -> (&str, &str) {
        let av = self.api_version();
        match av.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", av),
        }
    }

    pub fn name(&self) -> &str { self.meta_str("name") }

    pub fn namespace(&self) -> &str { self.meta_str("namespace") }

    pub fn labels(&self) -> BTreeMap<String, String> { self.meta_map("labels") }

    pub fn annotations(&self) -> BTreeMap<String, String> { self.meta_map("annotations") }

    /// Structural equality that ignores map key order and compares numbers by value.
    ///
    /// Scalars are otherwise compared exactly: the string `"1"` and the number
    /// `1` differ, as they do for the API server.
    pub fn semantic_eq(&self, other: &K8sObject) -> bool {
        maps_eq(&self.0, &other.0)
    }

    fn str_field(&self, key: &str) -> &str {
        self.0.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }

    fn meta_str(&self, key: &str) -> &str {
        self.0.get("metadata").and_then(|m| m.get(key)).and_then(|v| v.as_str()).unwrap_or("")
    }

    fn meta_map(&self, key: &str) -> BTreeMap<String, String> {
        let Some(obj) = self.0.get("metadata").and_then(|m| m.get(key)).and_then(|v| v.as_object()) else {
            return BTreeMap::new();
        };
        obj.iter()
            .map(|(k, v)| {
                let val = match v {
                    Json::String(s) => s.clone(),
                    Json::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), val)
            })
            .collect()
    }
}

fn maps_eq(a: &Map<String, Json>, b: &Map<String, Json>) -> bool {
    a.len() == b.len() && a.iter().all(|(k, av)| b.get(k).map(|bv| values_eq(av, bv)).unwrap_or(false))
}

fn values_eq(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Object(ao), Json::Object(bo)) => maps_eq(ao, bo),
        (Json::Array(aa), Json::Array(bb)) => aa.len() == bb.len() && aa.iter().zip(bb).all(|(x, y)| values_eq(x, y)),
        (Json::Number(an), Json::Number(bn)) => {
            if an == bn { return true; }
            match (an.as_f64(), bn.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (av, bv) => av == bv,
    }
}

fn json_type(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "sequence",
        Json::Object(_) => "mapping",
    }
}

/// A loaded object enriched with identity, group membership and origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub group_id: String,
    pub manifest_path: String,
    pub k8s_object: Arc<K8sObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupWait {
    /// Zero means no wait.
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSpec {
    pub cmd: Vec<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupHooks {
    pub pre: Option<HookSpec>,
    pub post: Option<HookSpec>,
}

/// Policy bundle shared by every resource under a manifest sub-tree (or a stream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub path: String,
    pub priority: i32,
    pub wait: GroupWait,
    pub hooks: GroupHooks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DesiredState {
    Exists,
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanState {
    pub state: DesiredState,
    pub resource: Resource,
}

/// Record of a finished run, handed to state repositories.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub applied_resources: Vec<Resource>,
    pub deleted_resources: Vec<Resource>,
}
