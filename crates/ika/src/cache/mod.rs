pub mod cluster_queue;
pub mod cohort;
pub mod selector;
pub mod store;
pub mod workload;

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::cache::cluster_queue::{
    ClusterQueue, ClusterQueueSpec, ClusterQueueUsage, LocalQueueFlavorUsage, QueueStatus,
};
use crate::cache::cohort::CohortIndex;
use crate::cache::store::{LocalQueueSpec, ObjectStore};
use crate::cache::workload::{Workload, WorkloadInfo, WorkloadKey};
use crate::common::error::CacheError;
use crate::resources::{FlavorName, ResourceFlavor};
use crate::{Map, Set};

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheConfig {
    /// When enabled, the cache tracks the pods-ready condition of every
    /// admitted workload and exposes the readiness gate.
    pub pods_ready_tracking: bool,
}

/// The scheduler's in-memory view of cluster queues, resource flavors,
/// cohorts and tracked workloads.
///
/// The whole state graph sits behind one reader/writer lock: mutators
/// serialize through the write side while queries share the read side and
/// observe a consistent snapshot. No lock is held across an `.await` and the
/// cache performs no external reads under the lock. Objects are ingested by
/// value and queries return freshly built projections, so callers can never
/// alias the internal graph.
pub struct Cache {
    client: Arc<dyn ObjectStore>,
    pods_ready_tracking: bool,
    pods_ready_changed: Notify,
    pub(crate) state: RwLock<CacheState>,
}

#[derive(Default)]
pub(crate) struct CacheState {
    pub(crate) cluster_queues: Map<String, ClusterQueue>,
    pub(crate) resource_flavors: Map<FlavorName, ResourceFlavor>,
    pub(crate) cohorts: CohortIndex,
    /// Workloads the scheduler accounted for before the external store
    /// confirmed their admission, keyed to their target cluster queue.
    pub(crate) assumed_workloads: Map<WorkloadKey, String>,
}

impl Cache {
    pub fn new(client: Arc<dyn ObjectStore>) -> Cache {
        Cache::with_config(client, CacheConfig::default())
    }

    pub fn with_config(client: Arc<dyn ObjectStore>, config: CacheConfig) -> Cache {
        Cache {
            client,
            pods_ready_tracking: config.pods_ready_tracking,
            pods_ready_changed: Notify::new(),
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Registers or replaces a resource flavor and recomputes every cluster
    /// queue's label keys and status. Returns the names of the queues that
    /// became active, so the caller can requeue their workloads.
    pub fn add_or_update_flavor(&self, flavor: ResourceFlavor) -> Vec<String> {
        let mut state = self.state.write();
        state.resource_flavors.insert(flavor.name.clone(), flavor);
        state.refresh_queue_statuses()
    }

    /// Removes a flavor that no cluster queue references anymore.
    pub fn delete_flavor(&self, name: &str) -> crate::Result<()> {
        let mut state = self.state.write();
        let mut queues: Vec<String> = state
            .cluster_queues
            .values()
            .filter(|queue| queue.flavor_in_use(name))
            .map(|queue| queue.name.clone())
            .collect();
        if !queues.is_empty() {
            queues.sort_unstable();
            return Err(CacheError::FlavorInUse {
                flavor: name.to_string(),
                queues,
            });
        }
        state.resource_flavors.remove(name);
        state.refresh_queue_statuses();
        Ok(())
    }

    /// Names of the cluster queues declaring a quota under the flavor.
    pub fn cluster_queues_using_flavor(&self, flavor: &str) -> Vec<String> {
        let state = self.state.read();
        let mut queues: Vec<String> = state
            .cluster_queues
            .values()
            .filter(|queue| queue.flavor_in_use(flavor))
            .map(|queue| queue.name.clone())
            .collect();
        queues.sort_unstable();
        queues
    }

    /// Inserts a new cluster queue and replays the local queues and admitted
    /// workloads the external store already holds for it, so that the add
    /// event may arrive in any order relative to them.
    pub fn add_cluster_queue(&self, spec: ClusterQueueSpec) -> crate::Result<()> {
        // Store reads happen before the lock is taken.
        let local_queues = self.client.local_queues_for(&spec.name);
        let workloads = self.client.workloads_for(&spec.name);

        {
            let mut state = self.state.write();
            if state.cluster_queues.contains_key(&spec.name) {
                return Err(CacheError::AlreadyExists(format!(
                    "cluster queue {}",
                    spec.name
                )));
            }
            let mut queue = ClusterQueue::new(&spec, &state.resource_flavors)?;
            for local_queue in &local_queues {
                if local_queue.cluster_queue == spec.name {
                    // The store may hand the same queue out twice; keep the
                    // first binding.
                    let _ = queue.add_local_queue(local_queue);
                }
            }
            if let Some(cohort) = &queue.cohort {
                state.cohorts.insert(cohort, &spec.name);
            }
            state.cluster_queues.insert(spec.name.clone(), queue);
            for workload in workloads {
                let targets_queue = workload
                    .admission
                    .as_ref()
                    .is_some_and(|admission| admission.cluster_queue == spec.name);
                if targets_queue {
                    state.add_or_update_workload(workload);
                }
            }
        }
        Ok(())
    }

    /// Replaces a cluster queue definition in place, keeping its admitted
    /// workloads credited.
    pub fn update_cluster_queue(&self, spec: ClusterQueueSpec) -> crate::Result<()> {
        let mut state = self.state.write();
        let CacheState {
            cluster_queues,
            resource_flavors,
            cohorts,
            ..
        } = &mut *state;
        let queue = cluster_queues
            .get_mut(&spec.name)
            .ok_or_else(|| CacheError::ClusterQueueNotFound(spec.name.clone()))?;
        let old_cohort = queue.cohort.clone();
        queue.update(&spec, resource_flavors)?;
        if old_cohort != queue.cohort {
            if let Some(cohort) = &old_cohort {
                cohorts.remove(cohort, &spec.name);
            }
            if let Some(cohort) = &queue.cohort {
                cohorts.insert(cohort, &spec.name);
            }
        }
        Ok(())
    }

    /// Drops a cluster queue together with its local queues, admitted
    /// workload accounting and assumed entries. Unknown names are ignored.
    pub fn delete_cluster_queue(&self, name: &str) {
        {
            let mut state = self.state.write();
            let Some(queue) = state.cluster_queues.remove(name) else {
                return;
            };
            if let Some(cohort) = &queue.cohort {
                state.cohorts.remove(cohort, name);
            }
            state
                .assumed_workloads
                .retain(|_, assumed_queue| assumed_queue != name);
        }
        self.broadcast_pods_ready();
    }

    /// Attaches a local queue to its cluster queue. A reference to a cluster
    /// queue the cache does not hold yet is not an error; the binding is
    /// replayed when that queue is added.
    pub fn add_local_queue(&self, spec: LocalQueueSpec) -> crate::Result<()> {
        let mut state = self.state.write();
        let Some(queue) = state.cluster_queues.get_mut(&spec.cluster_queue) else {
            return Ok(());
        };
        queue.add_local_queue(&spec)
    }

    /// Moves a local queue between cluster queues. Rebinding to the same
    /// cluster queue is a no-op.
    pub fn update_local_queue(
        &self,
        old: &LocalQueueSpec,
        new: LocalQueueSpec,
    ) -> crate::Result<()> {
        if old.cluster_queue == new.cluster_queue {
            return Ok(());
        }
        let mut state = self.state.write();
        if let Some(queue) = state.cluster_queues.get_mut(&old.cluster_queue) {
            queue.delete_local_queue(&old.key());
        }
        match state.cluster_queues.get_mut(&new.cluster_queue) {
            Some(queue) => queue.add_local_queue(&new),
            None => Ok(()),
        }
    }

    pub fn delete_local_queue(&self, spec: &LocalQueueSpec) {
        let mut state = self.state.write();
        if let Some(queue) = state.cluster_queues.get_mut(&spec.cluster_queue) {
            queue.delete_local_queue(&spec.key());
        }
    }

    /// Tracks an admitted workload, replacing any previously tracked version
    /// under the same key. Returns false when the workload is not admitted or
    /// its target cluster queue is unknown; both are routine signals for the
    /// reconciler, not failures.
    pub fn add_or_update_workload(&self, workload: Workload) -> bool {
        let added = self.state.write().add_or_update_workload(workload);
        if added {
            self.broadcast_pods_ready();
        }
        added
    }

    /// Atomically moves a workload from its old admission target to its new
    /// one (the two may coincide). Nothing is mutated unless both targets
    /// resolve and the new version decodes cleanly.
    pub fn update_workload(&self, old: &Workload, new: Workload) -> crate::Result<()> {
        {
            let mut state = self.state.write();
            if let Some(admission) = &old.admission {
                if !state.cluster_queues.contains_key(&admission.cluster_queue) {
                    return Err(CacheError::OldClusterQueueMissing(
                        admission.cluster_queue.clone(),
                    ));
                }
            }
            let new_info = match &new.admission {
                Some(admission) => {
                    if !state.cluster_queues.contains_key(&admission.cluster_queue) {
                        return Err(CacheError::NewClusterQueueMissing(
                            admission.cluster_queue.clone(),
                        ));
                    }
                    Some(WorkloadInfo::new(new)?)
                }
                None => None,
            };

            if let Some(admission) = &old.admission {
                if let Some(queue) = state.cluster_queues.get_mut(&admission.cluster_queue) {
                    let key = old.key();
                    if queue.workloads.contains_key(&key) {
                        let _ = queue.remove_workload(&key);
                    }
                }
            }
            match new_info {
                Some(info) => {
                    state.cleanup_assumed_state(&info.key, Some(&info.cluster_queue));
                    let queue = state
                        .cluster_queues
                        .get_mut(&info.cluster_queue)
                        .ok_or_else(|| CacheError::NewClusterQueueMissing(info.cluster_queue.clone()))?;
                    queue.add_workload(info)?;
                }
                None => {
                    state.cleanup_assumed_state(&old.key(), None);
                }
            }
        }
        self.broadcast_pods_ready();
        Ok(())
    }

    /// Stops tracking a workload. The owning cluster queue is resolved
    /// through the admission decision or, for a workload whose admission was
    /// cancelled externally, through the assumed-workloads index or the queue
    /// that still tracks the key.
    pub fn delete_workload(&self, workload: &Workload) -> crate::Result<()> {
        {
            let mut state = self.state.write();
            let key = workload.key();
            let queue_name = workload
                .admission
                .as_ref()
                .map(|admission| admission.cluster_queue.clone())
                .or_else(|| state.assumed_workloads.get(&key).cloned())
                .or_else(|| {
                    // A copy whose admission was cancelled externally may
                    // still be tracked; find the queue that holds it.
                    state
                        .cluster_queues
                        .values()
                        .find(|queue| queue.workloads.contains_key(&key))
                        .map(|queue| queue.name.clone())
                })
                .ok_or_else(|| {
                    CacheError::ClusterQueueNotFound(format!("of workload {key}"))
                })?;
            if !state.cluster_queues.contains_key(&queue_name) {
                return Err(CacheError::ClusterQueueNotFound(queue_name));
            }
            state.cleanup_assumed_state(
                &key,
                workload
                    .admission
                    .as_ref()
                    .map(|admission| admission.cluster_queue.as_str()),
            );
            if let Some(queue) = state.cluster_queues.get_mut(&queue_name) {
                if queue.workloads.contains_key(&key) {
                    let _ = queue.remove_workload(&key);
                }
            }
        }
        self.broadcast_pods_ready();
        Ok(())
    }

    /// Optimistically credits a workload the scheduler has decided to admit,
    /// before the external store confirms the admission. Usage is untouched
    /// when the operation fails.
    pub fn assume_workload(&self, workload: Workload) -> crate::Result<()> {
        let mut state = self.state.write();
        if !workload.is_admitted() {
            return Err(CacheError::WorkloadNotAdmitted(workload.key()));
        }
        let key = workload.key();
        if state.assumed_workloads.contains_key(&key) {
            return Err(CacheError::AlreadyExists(format!("assumed workload {key}")));
        }
        let info = WorkloadInfo::new(workload)?;
        let queue_name = info.cluster_queue.clone();
        let queue = state
            .cluster_queues
            .get_mut(&queue_name)
            .ok_or_else(|| CacheError::ClusterQueueNotFound(queue_name.clone()))?;
        queue.add_workload(info)?;
        state.assumed_workloads.insert(key, queue_name);
        Ok(())
    }

    /// Reverts an earlier [`Cache::assume_workload`]. Fails when the workload
    /// was never assumed, even if it is otherwise tracked.
    pub fn forget_workload(&self, workload: &Workload) -> crate::Result<()> {
        {
            let mut state = self.state.write();
            let key = workload.key();
            let Some(assumed_queue) = state.assumed_workloads.get(&key).cloned() else {
                return Err(CacheError::NotAssumed(key));
            };
            state.cleanup_assumed_state(
                &key,
                workload
                    .admission
                    .as_ref()
                    .map(|admission| admission.cluster_queue.as_str()),
            );
            let queue_name = workload
                .admission
                .as_ref()
                .map(|admission| admission.cluster_queue.clone())
                .unwrap_or(assumed_queue);
            let queue = state
                .cluster_queues
                .get_mut(&queue_name)
                .ok_or(CacheError::ClusterQueueNotFound(queue_name))?;
            if queue.workloads.contains_key(&key) {
                let _ = queue.remove_workload(&key);
            }
        }
        self.broadcast_pods_ready();
        Ok(())
    }

    /// True iff the workload is either assumed or present in its target
    /// cluster queue's admitted set.
    pub fn is_assumed_or_admitted_workload(&self, workload: &Workload) -> bool {
        let state = self.state.read();
        let key = workload.key();
        if state.assumed_workloads.contains_key(&key) {
            return true;
        }
        workload.admission.as_ref().is_some_and(|admission| {
            state
                .cluster_queues
                .get(&admission.cluster_queue)
                .is_some_and(|queue| queue.workloads.contains_key(&key))
        })
    }

    /// Per-flavor usage of a cluster queue, with the borrowed component, and
    /// the number of tracked workloads.
    pub fn usage(&self, cluster_queue: &str) -> crate::Result<ClusterQueueUsage> {
        let state = self.state.read();
        let queue = state
            .cluster_queues
            .get(cluster_queue)
            .ok_or_else(|| CacheError::ClusterQueueNotFound(cluster_queue.to_string()))?;
        Ok(ClusterQueueUsage {
            flavors: queue.flavor_usage(),
            admitted_workloads: queue.workloads.len(),
        })
    }

    /// Usage of one local queue, scoped to its slice of the cluster queue.
    pub fn local_queue_usage(
        &self,
        spec: &LocalQueueSpec,
    ) -> crate::Result<Vec<LocalQueueFlavorUsage>> {
        let state = self.state.read();
        let queue = state
            .cluster_queues
            .get(&spec.cluster_queue)
            .ok_or_else(|| CacheError::ClusterQueueNotFound(spec.cluster_queue.clone()))?;
        queue
            .local_queue_usage(&spec.key())
            .ok_or_else(|| CacheError::NotFound(format!("local queue {}", spec.key())))
    }

    /// Number of admitted workloads submitted through the local queue, zero
    /// when the queue is unknown.
    pub fn admitted_workloads_in_local_queue(&self, spec: &LocalQueueSpec) -> i64 {
        let state = self.state.read();
        state
            .cluster_queues
            .get(&spec.cluster_queue)
            .and_then(|queue| queue.local_queues.get(&spec.key()))
            .map_or(0, |local_queue| local_queue.admitted_workloads)
    }

    /// Names of the cluster queues whose namespace selector accepts the
    /// given label set.
    pub fn matching_cluster_queues(&self, namespace_labels: &Map<String, String>) -> Set<String> {
        let state = self.state.read();
        state
            .cluster_queues
            .values()
            .filter(|queue| queue.namespace_selector.matches(namespace_labels))
            .map(|queue| queue.name.clone())
            .collect()
    }

    /// True iff every tracked workload has reported all pods ready.
    /// Trivially true when readiness tracking is disabled.
    pub fn pods_ready_for_all_admitted_workloads(&self) -> bool {
        if !self.pods_ready_tracking {
            return true;
        }
        let state = self.state.read();
        for queue in state.cluster_queues.values() {
            if let Some(key) = queue.workloads_not_ready.iter().next() {
                log::debug!(
                    "Workload {key} in cluster queue {} does not have all pods ready",
                    queue.name
                );
                return false;
            }
        }
        true
    }

    /// Blocks until every tracked workload reports pods-ready or the token is
    /// cancelled. Returns immediately when readiness tracking is disabled.
    pub async fn wait_for_pods_ready(&self, cancel: &CancellationToken) {
        if !self.pods_ready_tracking {
            return;
        }
        loop {
            // Arm the listener before checking the predicate so a broadcast
            // between the check and the await cannot be missed.
            let notified = self.pods_ready_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pods_ready_for_all_admitted_workloads() {
                return;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// Companion task for [`Cache::wait_for_pods_ready`]: waits for the token
    /// and wakes every waiter exactly once when it fires.
    pub async fn cleanup_on_context(&self, cancel: CancellationToken) {
        cancel.cancelled().await;
        self.pods_ready_changed.notify_waiters();
    }

    fn broadcast_pods_ready(&self) {
        if self.pods_ready_tracking {
            self.pods_ready_changed.notify_waiters();
        }
    }
}

impl CacheState {
    /// Recomputes label keys and status of every cluster queue against the
    /// flavor registry. Returns the queues that went pending -> active.
    fn refresh_queue_statuses(&mut self) -> Vec<String> {
        let CacheState {
            cluster_queues,
            resource_flavors,
            ..
        } = self;
        let mut activated = Vec::new();
        for queue in cluster_queues.values_mut() {
            let previous = queue.status;
            queue.update_with_flavors(resource_flavors);
            if previous == QueueStatus::Pending && queue.status == QueueStatus::Active {
                activated.push(queue.name.clone());
            }
        }
        activated.sort_unstable();
        activated
    }

    fn add_or_update_workload(&mut self, workload: Workload) -> bool {
        if !workload.is_admitted() {
            return false;
        }
        let info = match WorkloadInfo::new(workload) {
            Ok(info) => info,
            Err(error) => {
                log::warn!("Ignoring workload with a malformed admission: {error}");
                return false;
            }
        };
        if !self.cluster_queues.contains_key(&info.cluster_queue) {
            return false;
        }
        self.cleanup_assumed_state(&info.key, Some(&info.cluster_queue));
        // A previously tracked version under the same key is uncredited
        // first, wherever it was admitted.
        for queue in self.cluster_queues.values_mut() {
            if queue.workloads.contains_key(&info.key) {
                let _ = queue.remove_workload(&info.key);
            }
        }
        let Some(queue) = self.cluster_queues.get_mut(&info.cluster_queue) else {
            return false;
        };
        let _ = queue.add_workload(info);
        true
    }

    /// Drops the assumed entry for `key`, uncrediting the assumed cluster
    /// queue when the confirmed admission landed on a different one.
    fn cleanup_assumed_state(&mut self, key: &str, admitted_to: Option<&str>) {
        if let Some(assumed_queue) = self.assumed_workloads.remove(key) {
            let moved_elsewhere = admitted_to.is_some_and(|target| target != assumed_queue);
            if moved_elsewhere {
                if let Some(queue) = self.cluster_queues.get_mut(&assumed_queue) {
                    if queue.workloads.contains_key(key) {
                        let _ = queue.remove_workload(key);
                    }
                }
            }
        }
    }
}
