pub mod quantity;

use serde::{Deserialize, Serialize};

use crate::Map;

pub use quantity::{format_quantity, parse_quantity};

pub type ResourceName = String;
pub type FlavorName = String;

pub const CPU_RESOURCE_NAME: &str = "cpu";
pub const MEMORY_RESOURCE_NAME: &str = "memory";

/// Consumed canonical units, one entry per (flavor, resource) pair declared
/// by the owning cluster queue.
pub type FlavorResourceQuantities = Map<FlavorName, Map<ResourceName, i64>>;

/// A named class of machines or accelerators. The label map is matched
/// against pod node-selectors by the admission loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceFlavor {
    pub name: FlavorName,
    #[serde(default)]
    pub labels: Map<String, String>,
}
