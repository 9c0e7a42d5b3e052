use serde::{Deserialize, Serialize};

use crate::cache::selector::{LabelSelector, NamespaceSelector};
use crate::cache::store::LocalQueueSpec;
use crate::cache::workload::{WorkloadInfo, WorkloadKey};
use crate::common::error::CacheError;
use crate::resources::{
    parse_quantity, FlavorName, FlavorResourceQuantities, ResourceFlavor, ResourceName,
};
use crate::{Map, Set};

/// Declared shape of a cluster queue, as delivered by the external store.
/// Quota quantities arrive as decimal strings and are decoded on ingress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterQueueSpec {
    pub name: String,
    #[serde(default)]
    pub cohort: Option<String>,
    #[serde(default)]
    pub resource_groups: Vec<ResourceGroupSpec>,
    #[serde(default)]
    pub namespace_selector: Option<LabelSelector>,
    #[serde(default)]
    pub preemption: PreemptionPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceGroupSpec {
    pub covered_resources: Vec<ResourceName>,
    pub flavors: Vec<FlavorQuotasSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlavorQuotasSpec {
    pub name: FlavorName,
    pub resources: Vec<ResourceQuotaSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceQuotaSpec {
    pub name: ResourceName,
    pub nominal_quota: String,
    /// Absent means the queue may not borrow this resource from its cohort.
    #[serde(default)]
    pub borrowing_limit: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PreemptionPolicy {
    pub reclaim_within_cohort: PreemptionRule,
    pub within_cluster_queue: PreemptionRule,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum PreemptionRule {
    #[default]
    Never,
    LowerPriority,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum QueueStatus {
    /// Every referenced flavor is known to the flavor registry.
    Active,
    /// At least one referenced flavor is missing.
    Pending,
}

/// Quota for one (flavor, resource) pair, in canonical units.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceQuota {
    pub nominal: i64,
    pub borrowing_limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct FlavorQuotas {
    pub name: FlavorName,
    pub resources: Map<ResourceName, ResourceQuota>,
}

#[derive(Debug, Clone)]
pub struct ResourceGroup {
    pub covered_resources: Set<ResourceName>,
    pub flavors: Vec<FlavorQuotas>,
    /// Union of the label keys of every present flavor in the group.
    pub label_keys: Set<String>,
}

/// Namespace-scoped projection of a cluster queue. It has no quota of its
/// own; it mirrors its slice of the parent's usage.
#[derive(Debug)]
pub struct LocalQueue {
    pub key: String,
    pub admitted_workloads: i64,
    pub usage: FlavorResourceQuantities,
}

impl LocalQueue {
    fn new(key: String, declared: &FlavorResourceQuantities) -> LocalQueue {
        let mut queue = LocalQueue {
            key,
            admitted_workloads: 0,
            usage: Map::default(),
        };
        queue.reset(declared);
        queue
    }

    /// Zeroes the usage submap back to one entry per declared pair.
    fn reset(&mut self, declared: &FlavorResourceQuantities) {
        self.admitted_workloads = 0;
        self.usage = zeroed(declared);
    }
}

fn zeroed(declared: &FlavorResourceQuantities) -> FlavorResourceQuantities {
    declared
        .iter()
        .map(|(flavor, resources)| {
            (
                flavor.clone(),
                resources.keys().map(|name| (name.clone(), 0)).collect(),
            )
        })
        .collect()
}

/// Adds `m` times the workload's contributions into a usage map. Only
/// (flavor, resource) pairs the map already declares are touched.
fn update_usage(info: &WorkloadInfo, usage: &mut FlavorResourceQuantities, m: i64) {
    for pod_set in &info.total_requests {
        for (resource, flavor) in &pod_set.flavors {
            let Some(value) = pod_set.requests.get(resource) else {
                continue;
            };
            let Some(flavor_usage) = usage.get_mut(flavor) else {
                continue;
            };
            if let Some(slot) = flavor_usage.get_mut(resource) {
                *slot += value * m;
            }
        }
    }
}

/// Usage report for one resource under one flavor. `borrowed` is the amount
/// consumed above the nominal quota via the cohort; it is zero for queues
/// outside any cohort.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceUsage {
    pub name: ResourceName,
    pub total: i64,
    pub borrowed: i64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FlavorUsage {
    pub name: FlavorName,
    pub resources: Vec<ResourceUsage>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClusterQueueUsage {
    pub flavors: Vec<FlavorUsage>,
    pub admitted_workloads: usize,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocalQueueResourceUsage {
    pub name: ResourceName,
    pub total: i64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocalQueueFlavorUsage {
    pub name: FlavorName,
    pub resources: Vec<LocalQueueResourceUsage>,
}

#[derive(Debug)]
pub struct ClusterQueue {
    pub name: String,
    pub resource_groups: Vec<ResourceGroup>,
    /// Reverse index from a covered resource to its owning group.
    group_for_resource: Map<ResourceName, usize>,
    pub namespace_selector: NamespaceSelector,
    pub preemption: PreemptionPolicy,
    /// One entry per declared (flavor, resource) pair, including flavors that
    /// do not exist in the flavor registry yet.
    pub usage: FlavorResourceQuantities,
    pub workloads: Map<WorkloadKey, WorkloadInfo>,
    pub workloads_not_ready: Set<WorkloadKey>,
    pub local_queues: Map<String, LocalQueue>,
    pub status: QueueStatus,
    pub cohort: Option<String>,
}

impl ClusterQueue {
    pub fn new(
        spec: &ClusterQueueSpec,
        flavors: &Map<FlavorName, ResourceFlavor>,
    ) -> crate::Result<ClusterQueue> {
        let groups = compile_resource_groups(&spec.resource_groups)?;
        let namespace_selector = NamespaceSelector::compile(spec.namespace_selector.as_ref())?;
        let mut queue = ClusterQueue {
            name: spec.name.clone(),
            resource_groups: Vec::new(),
            group_for_resource: Map::default(),
            namespace_selector,
            preemption: spec.preemption,
            usage: Map::default(),
            workloads: Map::default(),
            workloads_not_ready: Set::default(),
            local_queues: Map::default(),
            status: QueueStatus::Pending,
            cohort: spec.cohort.clone(),
        };
        queue.install_groups(groups);
        queue.update_with_flavors(flavors);
        Ok(queue)
    }

    /// Replaces the queue definition while preserving the admitted workload
    /// set. Usage totals and every local queue's slice are recomputed from
    /// scratch so that restructured resource groups cannot leave stale
    /// entries behind.
    pub fn update(
        &mut self,
        spec: &ClusterQueueSpec,
        flavors: &Map<FlavorName, ResourceFlavor>,
    ) -> crate::Result<()> {
        let groups = compile_resource_groups(&spec.resource_groups)?;
        let namespace_selector = NamespaceSelector::compile(spec.namespace_selector.as_ref())?;

        self.install_groups(groups);
        self.namespace_selector = namespace_selector;
        self.preemption = spec.preemption;
        self.cohort = spec.cohort.clone();
        self.update_with_flavors(flavors);

        let declared = self.usage.clone();
        for queue in self.local_queues.values_mut() {
            queue.reset(&declared);
        }
        let workloads = std::mem::take(&mut self.workloads);
        for info in workloads.values() {
            self.update_workload_usage(info, 1);
        }
        self.workloads = workloads;
        Ok(())
    }

    fn install_groups(&mut self, groups: Vec<ResourceGroup>) {
        let mut group_for_resource = Map::default();
        let mut usage: FlavorResourceQuantities = Map::default();
        for (index, group) in groups.iter().enumerate() {
            for resource in &group.covered_resources {
                let previous = group_for_resource.insert(resource.clone(), index);
                debug_assert!(
                    previous.is_none(),
                    "resource {resource} covered by two resource groups"
                );
            }
            for flavor in &group.flavors {
                let entry = usage.entry(flavor.name.clone()).or_default();
                for resource in flavor.resources.keys() {
                    entry.insert(resource.clone(), 0);
                }
            }
        }
        self.resource_groups = groups;
        self.group_for_resource = group_for_resource;
        self.usage = usage;
    }

    /// Recomputes each group's label keys and the queue status against the
    /// current flavor registry.
    pub fn update_with_flavors(&mut self, flavors: &Map<FlavorName, ResourceFlavor>) {
        let mut missing_flavor = false;
        for group in &mut self.resource_groups {
            let mut label_keys = Set::default();
            for flavor_quotas in &group.flavors {
                match flavors.get(&flavor_quotas.name) {
                    Some(flavor) => label_keys.extend(flavor.labels.keys().cloned()),
                    None => missing_flavor = true,
                }
            }
            group.label_keys = label_keys;
        }
        self.status = if missing_flavor {
            QueueStatus::Pending
        } else {
            QueueStatus::Active
        };
    }

    pub fn resource_group_for(&self, resource: &str) -> Option<&ResourceGroup> {
        self.group_for_resource
            .get(resource)
            .map(|&index| &self.resource_groups[index])
    }

    pub fn flavor_in_use(&self, flavor: &str) -> bool {
        self.resource_groups.iter().any(|group| {
            group
                .flavors
                .iter()
                .any(|flavor_quotas| flavor_quotas.name == flavor)
        })
    }

    pub fn add_workload(&mut self, info: WorkloadInfo) -> crate::Result<()> {
        if self.workloads.contains_key(&info.key) {
            return Err(CacheError::AlreadyExists(format!(
                "workload {} in cluster queue {}",
                info.key, self.name
            )));
        }
        if !info.workload.has_all_pods_ready() {
            self.workloads_not_ready.insert(info.key.clone());
        }
        self.update_workload_usage(&info, 1);
        self.workloads.insert(info.key.clone(), info);
        Ok(())
    }

    pub fn remove_workload(&mut self, key: &str) -> crate::Result<WorkloadInfo> {
        let info = self
            .workloads
            .remove(key)
            .ok_or_else(|| CacheError::NotFound(format!("workload {key}")))?;
        self.workloads_not_ready.remove(key);
        self.update_workload_usage(&info, -1);
        Ok(info)
    }

    fn update_workload_usage(&mut self, info: &WorkloadInfo, m: i64) {
        update_usage(info, &mut self.usage, m);
        if let Some(queue_key) = info.queue_key() {
            if let Some(queue) = self.local_queues.get_mut(&queue_key) {
                update_usage(info, &mut queue.usage, m);
                queue.admitted_workloads += m;
            }
        }
    }

    /// Registers a local queue and seeds it from the already admitted
    /// workloads that were submitted through it.
    pub fn add_local_queue(&mut self, spec: &LocalQueueSpec) -> crate::Result<()> {
        let key = spec.key();
        if self.local_queues.contains_key(&key) {
            return Err(CacheError::AlreadyExists(format!("local queue {key}")));
        }
        let mut queue = LocalQueue::new(key.clone(), &self.usage);
        for info in self.workloads.values() {
            if info.queue_key().as_deref() == Some(key.as_str()) {
                update_usage(info, &mut queue.usage, 1);
                queue.admitted_workloads += 1;
            }
        }
        self.local_queues.insert(key, queue);
        Ok(())
    }

    pub fn delete_local_queue(&mut self, key: &str) {
        self.local_queues.remove(key);
    }

    /// Per-flavor usage report in declaration order, resources sorted by
    /// name. Borrowing is only reported for members of a cohort.
    pub fn flavor_usage(&self) -> Vec<FlavorUsage> {
        let mut report = Vec::with_capacity(self.usage.len());
        for group in &self.resource_groups {
            for flavor_quotas in &group.flavors {
                let flavor_usage = self.usage.get(&flavor_quotas.name);
                let mut resources: Vec<ResourceUsage> = flavor_quotas
                    .resources
                    .iter()
                    .map(|(resource, quota)| {
                        let total = flavor_usage
                            .and_then(|usage| usage.get(resource))
                            .copied()
                            .unwrap_or(0);
                        let borrowed = if self.cohort.is_some() {
                            (total - quota.nominal).max(0)
                        } else {
                            0
                        };
                        ResourceUsage {
                            name: resource.clone(),
                            total,
                            borrowed,
                        }
                    })
                    .collect();
                resources.sort_by(|a, b| a.name.cmp(&b.name));
                report.push(FlavorUsage {
                    name: flavor_quotas.name.clone(),
                    resources,
                });
            }
        }
        report
    }

    /// Usage report scoped to one local queue, in declaration order.
    pub fn local_queue_usage(&self, key: &str) -> Option<Vec<LocalQueueFlavorUsage>> {
        let queue = self.local_queues.get(key)?;
        let mut report = Vec::with_capacity(queue.usage.len());
        for group in &self.resource_groups {
            for flavor_quotas in &group.flavors {
                let flavor_usage = queue.usage.get(&flavor_quotas.name);
                let mut resources: Vec<LocalQueueResourceUsage> = flavor_quotas
                    .resources
                    .keys()
                    .map(|resource| LocalQueueResourceUsage {
                        name: resource.clone(),
                        total: flavor_usage
                            .and_then(|usage| usage.get(resource))
                            .copied()
                            .unwrap_or(0),
                    })
                    .collect();
                resources.sort_by(|a, b| a.name.cmp(&b.name));
                report.push(LocalQueueFlavorUsage {
                    name: flavor_quotas.name.clone(),
                    resources,
                });
            }
        }
        Some(report)
    }
}

fn compile_resource_groups(specs: &[ResourceGroupSpec]) -> crate::Result<Vec<ResourceGroup>> {
    let mut groups = Vec::with_capacity(specs.len());
    for group_spec in specs {
        let covered_resources: Set<ResourceName> =
            group_spec.covered_resources.iter().cloned().collect();
        let mut flavors = Vec::with_capacity(group_spec.flavors.len());
        for flavor_spec in &group_spec.flavors {
            let mut resources = Map::default();
            for quota_spec in &flavor_spec.resources {
                let nominal = parse_quantity(&quota_spec.name, &quota_spec.nominal_quota)?;
                let borrowing_limit = quota_spec
                    .borrowing_limit
                    .as_deref()
                    .map(|quantity| parse_quantity(&quota_spec.name, quantity))
                    .transpose()?;
                resources.insert(
                    quota_spec.name.clone(),
                    ResourceQuota {
                        nominal,
                        borrowing_limit,
                    },
                );
            }
            debug_assert!(
                flavor_spec.resources.len() == covered_resources.len()
                    && resources.keys().all(|name| covered_resources.contains(name)),
                "flavor {} must declare exactly the group's covered resources",
                flavor_spec.name
            );
            flavors.push(FlavorQuotas {
                name: flavor_spec.name.clone(),
                resources,
            });
        }
        groups.push(ResourceGroup {
            covered_resources,
            flavors,
            label_keys: Set::default(),
        });
    }
    Ok(groups)
}
