use serde::{Deserialize, Serialize};

use crate::resources::{parse_quantity, FlavorName, ResourceName};
use crate::Map;

pub type WorkloadKey = String;

/// Builds the `namespace/name` key under which local queues and workloads are
/// tracked. The empty namespace renders as `/name`.
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// A multi-pod job as delivered by the external store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    /// Name of the local queue the workload was submitted through, empty when
    /// it was not.
    #[serde(default)]
    pub queue: String,
    /// Present iff the workload has been admitted.
    #[serde(default)]
    pub admission: Option<Admission>,
    /// Last reported pods-ready condition, `None` when not reported yet.
    #[serde(default)]
    pub pods_ready: Option<bool>,
}

impl Workload {
    pub fn key(&self) -> WorkloadKey {
        object_key(&self.namespace, &self.name)
    }

    pub fn is_admitted(&self) -> bool {
        self.admission.is_some()
    }

    pub fn has_all_pods_ready(&self) -> bool {
        self.pods_ready == Some(true)
    }
}

/// The admission decision taken for a workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admission {
    pub cluster_queue: String,
    #[serde(default)]
    pub pod_set_assignments: Vec<PodSetAssignment>,
}

/// Flavor assignments and total requested quantities for one pod set.
/// Quantities are decimal strings covering the whole pod set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSetAssignment {
    pub name: String,
    #[serde(default)]
    pub flavors: Map<ResourceName, FlavorName>,
    #[serde(default)]
    pub resource_usage: Map<ResourceName, String>,
}

/// A workload with its admission decoded into canonical quantities. This is
/// the form the cache stores; the original object is retained for updates
/// that need to compare against the currently cached version.
#[derive(Debug, Clone)]
pub struct WorkloadInfo {
    pub key: WorkloadKey,
    pub cluster_queue: String,
    pub total_requests: Vec<PodSetResources>,
    pub workload: Workload,
}

#[derive(Debug, Clone)]
pub struct PodSetResources {
    pub name: String,
    pub flavors: Map<ResourceName, FlavorName>,
    pub requests: Map<ResourceName, i64>,
}

impl WorkloadInfo {
    pub fn new(workload: Workload) -> crate::Result<WorkloadInfo> {
        let key = workload.key();
        let (cluster_queue, total_requests) = match &workload.admission {
            Some(admission) => {
                let mut totals = Vec::with_capacity(admission.pod_set_assignments.len());
                for assignment in &admission.pod_set_assignments {
                    let mut requests = Map::default();
                    for (resource, quantity) in &assignment.resource_usage {
                        requests.insert(resource.clone(), parse_quantity(resource, quantity)?);
                    }
                    totals.push(PodSetResources {
                        name: assignment.name.clone(),
                        flavors: assignment.flavors.clone(),
                        requests,
                    });
                }
                (admission.cluster_queue.clone(), totals)
            }
            None => (String::new(), Vec::new()),
        };
        Ok(WorkloadInfo {
            key,
            cluster_queue,
            total_requests,
            workload,
        })
    }

    /// Key of the local queue the workload belongs to, when it names one.
    pub fn queue_key(&self) -> Option<String> {
        if self.workload.queue.is_empty() {
            None
        } else {
            Some(object_key(&self.workload.namespace, &self.workload.queue))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::CacheError;
    use crate::tests::utils::{admission, workload};

    #[test]
    fn test_empty_namespace_key() {
        let workload = workload("a", "").build();
        assert_eq!(workload.key(), "/a");
    }

    #[test]
    fn test_info_decodes_assignments() {
        let workload = workload("a", "ns")
            .admission(
                admission("one")
                    .assignment("cpu", "on-demand", "10m")
                    .assignment("memory", "on-demand", "512Ki"),
            )
            .build();
        let info = WorkloadInfo::new(workload).unwrap();
        assert_eq!(info.cluster_queue, "one");
        assert_eq!(info.total_requests.len(), 1);
        let requests = &info.total_requests[0].requests;
        assert_eq!(requests["cpu"], 10);
        assert_eq!(requests["memory"], 512 << 10);
    }

    #[test]
    fn test_info_rejects_malformed_quantity() {
        let workload = workload("a", "ns")
            .admission(admission("one").assignment("cpu", "on-demand", "lots"))
            .build();
        let error = WorkloadInfo::new(workload).unwrap_err();
        assert!(matches!(error, CacheError::InvalidQuantity { .. }));
    }

    #[test]
    fn test_unadmitted_info_is_empty() {
        let info = WorkloadInfo::new(workload("a", "ns").build()).unwrap();
        assert!(info.cluster_queue.is_empty());
        assert!(info.total_requests.is_empty());
    }
}
