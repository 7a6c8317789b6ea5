//! Peticiones y resultados de las operaciones de ciclo de vida.
//!
//! Los conflictos rutinarios (pausa repetida, fase ya en curso, estado no
//! reanudable) son variantes de resultado, no errores.
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use flow_core::{Flow, FlowId, FlowStatus, FlowType, OrchestratorResult, PhaseInitialization};

use crate::cache::InvalidationReport;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateFlowRequest {
    pub flow_type: String,
    pub flow_name: Option<String>,
    pub configuration: Option<Map<String, Value>>,
    /// Estado inicial para `handler_payload`.
    pub initial_state: Option<Value>,
}

impl CreateFlowRequest {
    pub fn new(flow_type: impl Into<String>) -> Self {
        Self { flow_type: flow_type.into(),
               ..Self::default() }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.flow_name = Some(name.into());
        self
    }

    pub fn with_configuration(mut self, configuration: Map<String, Value>) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn with_initial_state(mut self, state: Value) -> Self {
        self.initial_state = Some(state);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedFlow {
    pub flow_id: FlowId,
    pub flow: Flow,
    pub cache_registered: bool,
    pub initialization: PhaseInitialization,
}

/// Overrides de validación para `execute_phase`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOverrides {
    /// Ignora estado terminal/pausado, dependencias e idempotencia.
    pub force_execution: bool,
    pub skip_dependency_check: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseExecutionRequest {
    pub phase: String,
    pub input: Value,
    pub overrides: ExecutionOverrides,
}

impl PhaseExecutionRequest {
    pub fn new(phase: impl Into<String>) -> Self {
        Self { phase: phase.into(),
               ..Self::default() }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn forced(mut self) -> Self {
        self.overrides.force_execution = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseExecutionStatus {
    Completed,
    /// La fase ya figuraba en `phase_completion`; el handler no se invocó.
    AlreadyCompleted,
    /// Otra ejecución de la misma fase está en curso.
    DuplicateSkipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseExecutionResult {
    pub flow_id: FlowId,
    pub phase: String,
    pub status: PhaseExecutionStatus,
    pub summary: Value,
    pub flow_status: Option<FlowStatus>,
    pub current_phase: Option<String>,
    pub progress_percentage: Option<f64>,
    pub duration_ms: u64,
}

impl PhaseExecutionResult {
    pub(crate) fn skipped(flow_id: FlowId, phase: &str, status: PhaseExecutionStatus) -> Self {
        Self { flow_id,
               phase: phase.to_string(),
               status,
               summary: Value::Null,
               flow_status: None,
               current_phase: None,
               progress_percentage: None,
               duration_ms: 0 }
    }

    pub(crate) fn from_flow(flow: &Flow, phase: &str, status: PhaseExecutionStatus, summary: Value, duration_ms: u64) -> Self {
        Self { flow_id: flow.flow_id,
               phase: phase.to_string(),
               status,
               summary,
               flow_status: Some(flow.flow_status),
               current_phase: Some(flow.current_phase.clone()),
               progress_percentage: Some(flow.progress_percentage),
               duration_ms }
    }
}

pub type PhaseExecutionHandle = JoinHandle<OrchestratorResult<PhaseExecutionResult>>;

#[derive(Debug)]
pub enum ScheduledExecution {
    Scheduled { phase: String, handle: PhaseExecutionHandle },
    AlreadyRunning { phase: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PauseOutcome {
    Paused { flow: Flow },
    /// Ya estaba pausado o en estado terminal; no se escribió nada.
    AlreadyPaused { flow_id: FlowId, status: FlowStatus },
}

/// Trabajo desencadenado por una reanudación.
#[derive(Debug)]
pub enum ResumeExecution {
    None,
    Scheduled { phase: String, handle: PhaseExecutionHandle },
    Inline(Box<PhaseExecutionResult>),
}

#[derive(Debug)]
pub enum ResumeOutcome {
    Resumed { flow: Flow, execution: ResumeExecution },
    /// Estado no reanudable o handler incapaz de reanudar.
    Failed { flow_id: FlowId, status: Option<FlowStatus>, reason: String },
    /// No hay master pero sí un child huérfano con ese id.
    Guidance { flow_id: FlowId, flow_type: FlowType, message: String, repair_operation: String },
    /// La fase pedida ya se está ejecutando.
    AlreadyRunning { flow_id: FlowId, phase: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    pub flow: Flow,
    pub already_deleted: bool,
    pub invalidation: InvalidationReport,
}
