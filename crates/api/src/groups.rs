use std::sync::Arc;

use kahoy_core::{Error, Group, GroupRepository};

/// NEW groups shadowing OLD ones, so deletions of resources whose group only
/// exists in OLD still resolve.
pub struct LayeredGroups {
    primary: Arc<dyn GroupRepository>,
    fallback: Arc<dyn GroupRepository>,
}

impl LayeredGroups {
    pub fn new(primary: Arc<dyn GroupRepository>, fallback: Arc<dyn GroupRepository>) -> Self {
        Self { primary, fallback }
    }
}

impl GroupRepository for LayeredGroups {
    fn get_group(&self, id: &str) -> Result<Group, Error> {
        match self.primary.get_group(id) {
            Err(Error::Missing(_)) => self.fallback.get_group(id),
            other => other,
        }
    }

    fn list_groups(&self) -> Vec<Group> {
        let mut groups = self.primary.list_groups();
        for g in self.fallback.list_groups() {
            if !groups.iter().any(|p| p.id == g.id) {
                groups.push(g);
            }
        }
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        groups
    }
}
