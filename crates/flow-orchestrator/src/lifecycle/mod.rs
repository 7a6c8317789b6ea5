//! Operaciones de ciclo de vida: creación, ejecución de fases, pausa,
//! reanudación y borrado lógico.

mod creation;
mod execution;
mod operations;
mod results;

pub use creation::CreationOperations;
pub use execution::ExecutionOperations;
pub use operations::LifecycleOperations;
pub use results::{CreateFlowRequest, CreatedFlow, DeleteOutcome, ExecutionOverrides, PauseOutcome,
                  PhaseExecutionHandle, PhaseExecutionRequest, PhaseExecutionResult, PhaseExecutionStatus,
                  ResumeExecution, ResumeOutcome, ScheduledExecution};
