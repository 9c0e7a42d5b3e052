#![deny(clippy::await_holding_lock)]

pub mod cache;
pub mod common;
pub mod resources;

#[cfg(test)]
pub(crate) mod tests;

pub use common::data::{Map, Set};

pub type Error = crate::common::error::CacheError;
pub type Result<T> = std::result::Result<T, Error>;

pub use cache::cluster_queue::{
    ClusterQueueSpec, ClusterQueueUsage, FlavorUsage, LocalQueueFlavorUsage, PreemptionPolicy,
    PreemptionRule, QueueStatus, ResourceUsage,
};
pub use cache::selector::{LabelSelector, LabelSelectorRequirement, SelectorOperator};
pub use cache::store::{LocalQueueSpec, ObjectStore};
pub use cache::workload::{Admission, PodSetAssignment, Workload};
pub use cache::{Cache, CacheConfig};
pub use resources::ResourceFlavor;
