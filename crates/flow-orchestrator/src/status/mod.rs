//! Estado, descubrimiento de huérfanos y reparación.

mod discovery;
mod manager;
mod repair;

pub use discovery::{DiscoveredFlow, OrphanReason, SmartDiscoveryService};
pub use manager::{FlowStatusReport, OrphanSummary, StatusManager, StatusMetadata, StatusSource};
pub use repair::{FlowRepairService, RepairOption, RepairResult, RepairType};
