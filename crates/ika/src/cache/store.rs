use serde::{Deserialize, Serialize};

use crate::cache::workload::{object_key, Workload};

/// Per-namespace handle to a cluster queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalQueueSpec {
    pub name: String,
    pub namespace: String,
    pub cluster_queue: String,
}

impl LocalQueueSpec {
    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }
}

/// Read access to the external object store.
///
/// An add-cluster-queue event may arrive after the local queues and workloads
/// that reference the queue were already delivered (for example after a
/// controller restart). The cache consults the store on cluster-queue add to
/// replay those objects; it performs no other reads and never writes.
pub trait ObjectStore: Send + Sync {
    /// Local queues pointing at the given cluster queue.
    fn local_queues_for(&self, cluster_queue: &str) -> Vec<LocalQueueSpec>;

    /// Workloads whose admission targets the given cluster queue.
    fn workloads_for(&self, cluster_queue: &str) -> Vec<Workload>;
}
