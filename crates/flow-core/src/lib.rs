//! Núcleo del orquestador de flujos master.
//!
//! Tipos de dominio (registros master/child, `persistence_data`, auditoría),
//! registro de tipos de flujo, el seam de handlers por tipo y los traits de
//! repositorio y cache con sus backends en memoria. No contiene lógica de
//! orquestación: eso vive en `flow-orchestrator`.

pub mod cache;
pub mod constants;
pub mod errors;
pub mod handler;
pub mod model;
pub mod registry;
pub mod repo;

pub use cache::{CacheGateway, CachedFlowEntry, InMemoryCacheGateway};
pub use errors::{classify_error, CacheError, ErrorClass, HandlerError, OrchestratorError, OrchestratorResult,
                 RegistryError, RepositoryError};
pub use handler::{FnHandlerFactory, PhaseHandler, PhaseHandlerFactory, PhaseInitialization, PhaseOutcome,
                  ResumeContext, ResumeDirective, ResumeState, SharedHandlerFactory};
pub use model::{AuditCategory, AuditEvent, AuditLevel, ChildFlowRecord, Flow, FlowId, FlowMetadata, FlowStatus,
                PauseSnapshot, PersistenceData, PhaseCompletionEntry, StatusTransition, TenantContext, TenantScope};
pub use registry::{FlowType, FlowTypeConfig, FlowTypeRegistry, FlowTypeRegistryBuilder, PhaseDefinition, Registry};
pub use repo::{FlowQuery, FlowRepository, FlowTransaction, FlowWrite, InMemoryFlowRepository};
