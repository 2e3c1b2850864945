use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use kahoy_core::Resource;

use crate::{write_out, ResourceManager, SharedWriter};

/// Prints what would be applied or deleted as a group/resource tree.
pub struct DryRunManager {
    out: SharedWriter,
}

impl DryRunManager {
    pub fn new(out: SharedWriter) -> Self { Self { out } }
}

/// Groups and resource ids both sorted lexicographically.
pub fn render_tree(title: &str, resources: &[Resource]) -> String {
    if resources.is_empty() { return String::new(); }
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for r in resources {
        groups.entry(r.group_id.as_str()).or_default().push(r.id.as_str());
    }
    let mut s = format!("{} ({} resources)\n", title, resources.len());
    let last_group = groups.len().saturating_sub(1);
    for (gi, (group, mut ids)) in groups.into_iter().enumerate() {
        ids.sort_unstable();
        let (branch, indent) = if gi == last_group { ("└── ", "    ") } else { ("├── ", "│   ") };
        s.push_str(&format!("{}{} ({})\n", branch, group, ids.len()));
        let last_id = ids.len().saturating_sub(1);
        for (ii, id) in ids.into_iter().enumerate() {
            let leaf = if ii == last_id { "└── " } else { "├── " };
            s.push_str(&format!("{}{}{}\n", indent, leaf, id));
        }
    }
    s
}

#[async_trait]
impl ResourceManager for DryRunManager {
    async fn apply(&self, resources: &[Resource]) -> Result<()> {
        write_out(&self.out, render_tree("Apply", resources).as_bytes())
    }

    async fn delete(&self, resources: &[Resource]) -> Result<()> {
        write_out(&self.out, render_tree("Delete", resources).as_bytes())
    }
}
