//! Modelos del orquestador: registro master, registro child, snapshot de
//! pausa, `persistence_data` versionado y eventos de auditoría.

pub mod audit;
pub mod child;
pub mod flow;
pub mod ids;
pub mod persistence_data;
pub mod status;

pub use audit::{AuditCategory, AuditEvent, AuditLevel};
pub use child::ChildFlowRecord;
pub use flow::{Flow, FlowMetadata, StatusTransition};
pub use ids::{FlowId, TenantContext, TenantScope};
pub use persistence_data::{PauseSnapshot, PersistenceData, PhaseCompletionEntry};
pub use status::{FlowStatus, UnknownStatus};
