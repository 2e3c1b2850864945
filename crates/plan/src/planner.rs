//! OLD/NEW planner: which resources to apply and which to delete.

use std::collections::HashMap;

use kahoy_core::{DesiredState, PlanState, Resource};
use metrics::counter;
use tracing::debug;

/// Turns OLD and NEW resource lists into desired states.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner {
    /// Skip NEW resources that are semantically equal to their OLD version.
    pub only_on_diff: bool,
}

impl Planner {
    pub fn new(only_on_diff: bool) -> Self { Self { only_on_diff } }

    pub fn plan(&self, old: &[Resource], new: &[Resource]) -> Vec<PlanState> {
        let old_by_id: HashMap<&str, &Resource> = old.iter().map(|r| (r.id.as_str(), r)).collect();
        let new_ids: HashMap<&str, ()> = new.iter().map(|r| (r.id.as_str(), ())).collect();

        let mut out = Vec::with_capacity(new.len());
        let mut unchanged = 0u64;
        for r in new {
            if self.only_on_diff {
                if let Some(prev) = old_by_id.get(r.id.as_str()) {
                    if prev.k8s_object.semantic_eq(&r.k8s_object) {
                        unchanged += 1;
                        continue;
                    }
                }
            }
            out.push(PlanState { state: DesiredState::Exists, resource: r.clone() });
        }
        for r in old.iter().filter(|r| !new_ids.contains_key(r.id.as_str())) {
            out.push(PlanState { state: DesiredState::Missing, resource: r.clone() });
        }
        debug!(plan = out.len(), unchanged, "plan computed");
        counter!("kahoy_plan_unchanged_total", unchanged);
        out
    }
}
