use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("cluster queue {0} doesn't exist")]
    ClusterQueueNotFound(String),
    #[error("old cluster queue {0} doesn't exist")]
    OldClusterQueueMissing(String),
    #[error("new cluster queue {0} doesn't exist")]
    NewClusterQueueMissing(String),
    #[error("workload {0} is not assumed")]
    NotAssumed(String),
    #[error("workload {0} is not admitted")]
    WorkloadNotAdmitted(String),
    #[error("resource flavor {flavor} is in use by cluster queues {queues:?}")]
    FlavorInUse { flavor: String, queues: Vec<String> },
    #[error("invalid quantity for resource {resource}: {reason}")]
    InvalidQuantity { resource: String, reason: String },
    #[error("invalid namespace selector: {0}")]
    InvalidSelector(String),
}
