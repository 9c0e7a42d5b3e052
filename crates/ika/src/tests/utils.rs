use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::cluster_queue::{
    ClusterQueueSpec, FlavorQuotasSpec, ResourceGroupSpec, ResourceQuotaSpec,
};
use crate::cache::selector::LabelSelector;
use crate::cache::store::{LocalQueueSpec, ObjectStore};
use crate::cache::workload::{Admission, PodSetAssignment, Workload};
use crate::cache::{Cache, CacheConfig};
use crate::resources::ResourceFlavor;
use crate::Map;

/// In-memory stand-in for the external object store.
#[derive(Default)]
pub struct FakeStore {
    local_queues: RwLock<Vec<LocalQueueSpec>>,
    workloads: RwLock<Vec<Workload>>,
}

impl FakeStore {
    pub fn put_local_queue(&self, queue: LocalQueueSpec) {
        self.local_queues.write().push(queue);
    }

    pub fn put_workload(&self, workload: Workload) {
        self.workloads.write().push(workload);
    }
}

impl ObjectStore for FakeStore {
    fn local_queues_for(&self, cluster_queue: &str) -> Vec<LocalQueueSpec> {
        self.local_queues
            .read()
            .iter()
            .filter(|queue| queue.cluster_queue == cluster_queue)
            .cloned()
            .collect()
    }

    fn workloads_for(&self, cluster_queue: &str) -> Vec<Workload> {
        self.workloads
            .read()
            .iter()
            .filter(|workload| {
                workload
                    .admission
                    .as_ref()
                    .is_some_and(|admission| admission.cluster_queue == cluster_queue)
            })
            .cloned()
            .collect()
    }
}

pub fn create_cache() -> Cache {
    Cache::new(Arc::new(FakeStore::default()))
}

pub fn create_tracking_cache() -> Cache {
    Cache::with_config(
        Arc::new(FakeStore::default()),
        CacheConfig {
            pods_ready_tracking: true,
        },
    )
}

pub fn labels(pairs: &[(&str, &str)]) -> Map<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[derive(Clone)]
pub struct ClusterQueueBuilder {
    spec: ClusterQueueSpec,
}

pub fn cluster_queue(name: &str) -> ClusterQueueBuilder {
    ClusterQueueBuilder {
        spec: ClusterQueueSpec {
            name: name.to_string(),
            ..Default::default()
        },
    }
}

impl ClusterQueueBuilder {
    pub fn cohort(mut self, name: &str) -> Self {
        self.spec.cohort = Some(name.to_string());
        self
    }

    pub fn resource_group(mut self, flavors: Vec<FlavorQuotasSpec>) -> Self {
        let covered_resources = flavors
            .first()
            .map(|flavor| {
                flavor
                    .resources
                    .iter()
                    .map(|quota| quota.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        self.spec.resource_groups.push(ResourceGroupSpec {
            covered_resources,
            flavors,
        });
        self
    }

    pub fn namespace_selector(mut self, selector: LabelSelector) -> Self {
        self.spec.namespace_selector = Some(selector);
        self
    }

    pub fn build(self) -> ClusterQueueSpec {
        self.spec
    }
}

#[derive(Clone)]
pub struct FlavorQuotasBuilder {
    spec: FlavorQuotasSpec,
}

pub fn flavor_quotas(name: &str) -> FlavorQuotasBuilder {
    FlavorQuotasBuilder {
        spec: FlavorQuotasSpec {
            name: name.to_string(),
            resources: Vec::new(),
        },
    }
}

impl FlavorQuotasBuilder {
    pub fn resource(mut self, name: &str, nominal: &str) -> Self {
        self.spec.resources.push(ResourceQuotaSpec {
            name: name.to_string(),
            nominal_quota: nominal.to_string(),
            borrowing_limit: None,
        });
        self
    }

    pub fn resource_with_limit(mut self, name: &str, nominal: &str, limit: &str) -> Self {
        self.spec.resources.push(ResourceQuotaSpec {
            name: name.to_string(),
            nominal_quota: nominal.to_string(),
            borrowing_limit: Some(limit.to_string()),
        });
        self
    }

    pub fn build(self) -> FlavorQuotasSpec {
        self.spec
    }
}

#[derive(Clone)]
pub struct ResourceFlavorBuilder {
    flavor: ResourceFlavor,
}

pub fn resource_flavor(name: &str) -> ResourceFlavorBuilder {
    ResourceFlavorBuilder {
        flavor: ResourceFlavor {
            name: name.to_string(),
            labels: Map::default(),
        },
    }
}

impl ResourceFlavorBuilder {
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.flavor.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> ResourceFlavor {
        self.flavor
    }
}

pub fn local_queue(name: &str, namespace: &str, cluster_queue: &str) -> LocalQueueSpec {
    LocalQueueSpec {
        name: name.to_string(),
        namespace: namespace.to_string(),
        cluster_queue: cluster_queue.to_string(),
    }
}

#[derive(Clone)]
pub struct AdmissionBuilder {
    admission: Admission,
}

/// Builds an admission decision. [`AdmissionBuilder::assignment`] appends to
/// a single default pod set, which covers most tests; multi-pod-set
/// admissions use [`AdmissionBuilder::pod_set`].
pub fn admission(cluster_queue: &str) -> AdmissionBuilder {
    AdmissionBuilder {
        admission: Admission {
            cluster_queue: cluster_queue.to_string(),
            pod_set_assignments: Vec::new(),
        },
    }
}

impl AdmissionBuilder {
    pub fn assignment(mut self, resource: &str, flavor: &str, quantity: &str) -> Self {
        if self.admission.pod_set_assignments.is_empty() {
            self.admission.pod_set_assignments.push(PodSetAssignment {
                name: "main".to_string(),
                flavors: Map::default(),
                resource_usage: Map::default(),
            });
        }
        let pod_set = &mut self.admission.pod_set_assignments[0];
        pod_set
            .flavors
            .insert(resource.to_string(), flavor.to_string());
        pod_set
            .resource_usage
            .insert(resource.to_string(), quantity.to_string());
        self
    }

    pub fn pod_set(mut self, name: &str, assignments: &[(&str, &str, &str)]) -> Self {
        let mut pod_set = PodSetAssignment {
            name: name.to_string(),
            flavors: Map::default(),
            resource_usage: Map::default(),
        };
        for (resource, flavor, quantity) in assignments {
            pod_set
                .flavors
                .insert(resource.to_string(), flavor.to_string());
            pod_set
                .resource_usage
                .insert(resource.to_string(), quantity.to_string());
        }
        self.admission.pod_set_assignments.push(pod_set);
        self
    }

    pub fn build(self) -> Admission {
        self.admission
    }
}

#[derive(Clone)]
pub struct WorkloadBuilder {
    workload: Workload,
}

pub fn workload(name: &str, namespace: &str) -> WorkloadBuilder {
    WorkloadBuilder {
        workload: Workload {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        },
    }
}

impl WorkloadBuilder {
    pub fn queue(mut self, name: &str) -> Self {
        self.workload.queue = name.to_string();
        self
    }

    pub fn admission(mut self, admission: AdmissionBuilder) -> Self {
        self.workload.admission = Some(admission.build());
        self
    }

    pub fn pods_ready(mut self, ready: bool) -> Self {
        self.workload.pods_ready = Some(ready);
        self
    }

    pub fn build(self) -> Workload {
        self.workload
    }
}
