//! Orquestador de flujos master.
//!
//! Ciclo de vida (crear, ejecutar fase, pausar, reanudar, borrar), lock por
//! fase, invalidación de cache en tres capas, sincronización de estado
//! master/child, descubrimiento y reparación de huérfanos, auditoría y
//! métricas de rendimiento. El punto de entrada es `MasterFlowOrchestrator`.

pub mod audit;
pub mod cache;
pub mod config;
pub mod lifecycle;
pub mod lock;
pub mod orchestrator;
pub mod performance;
pub mod services;
pub mod status;
pub mod status_sync;

pub use audit::{AuditEntry, AuditLogger, AuditSink, InMemoryAuditSink};
pub use cache::{AppCache, CacheInvalidationCoordinator, InvalidationReport, SessionCache};
pub use config::OrchestratorConfig;
pub use lifecycle::{CreateFlowRequest, CreatedFlow, DeleteOutcome, ExecutionOverrides, PauseOutcome,
                    PhaseExecutionHandle, PhaseExecutionRequest, PhaseExecutionResult, PhaseExecutionStatus,
                    ResumeExecution, ResumeOutcome, ScheduledExecution};
pub use lock::{PhaseLockGuard, PhaseLockManager};
pub use orchestrator::{MasterFlowOrchestrator, OrchestratorBuilder};
pub use performance::{OperationStats, PerformanceMonitor, PerformanceSummary};
pub use status::{DiscoveredFlow, FlowStatusReport, OrphanReason, RepairOption, RepairResult, RepairType,
                 StatusSource};
pub use status_sync::{FlowHealthReport, ReconciliationReport, StatusChange, StatusSyncService};
