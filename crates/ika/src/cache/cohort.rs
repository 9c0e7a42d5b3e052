use crate::{Map, Set};

/// Index of cohort memberships. Cohorts are implicit: the first cluster queue
/// naming a cohort creates it, removing the last member destroys it. Cluster
/// queues store only the cohort name; all lookups go through this index.
#[derive(Debug, Default)]
pub struct CohortIndex {
    members: Map<String, Set<String>>,
}

impl CohortIndex {
    pub fn insert(&mut self, cohort: &str, cluster_queue: &str) {
        self.members
            .entry(cohort.to_string())
            .or_default()
            .insert(cluster_queue.to_string());
    }

    pub fn remove(&mut self, cohort: &str, cluster_queue: &str) {
        if let Some(members) = self.members.get_mut(cohort) {
            members.remove(cluster_queue);
            if members.is_empty() {
                self.members.remove(cohort);
            }
        }
    }

    pub fn members(&self, cohort: &str) -> Option<&Set<String>> {
        self.members.get(cohort)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_member_destroys_cohort() {
        let mut cohorts = CohortIndex::default();
        cohorts.insert("one", "a");
        cohorts.insert("one", "b");
        assert_eq!(cohorts.members("one").unwrap().len(), 2);

        cohorts.remove("one", "a");
        assert_eq!(cohorts.members("one").unwrap().len(), 1);
        cohorts.remove("one", "b");
        assert!(cohorts.members("one").is_none());
        assert!(cohorts.is_empty());
    }

    #[test]
    fn test_remove_unknown_member_is_noop() {
        let mut cohorts = CohortIndex::default();
        cohorts.insert("one", "a");
        cohorts.remove("two", "a");
        cohorts.remove("one", "b");
        assert_eq!(cohorts.members("one").unwrap().len(), 1);
    }
}
