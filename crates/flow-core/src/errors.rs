//! Errores del core del orquestador.
//!
//! La taxonomía sigue las clases operativas del orquestador: validación,
//! not-found, conflicto, degradación de infraestructura y fatal. Los
//! conflictos rutinarios (pausa repetida, fase duplicada) NO son errores: se
//! devuelven como resultados estructurados desde las operaciones.

use thiserror::Error;

use crate::model::{FlowId, FlowStatus};

/// Errores de acceso al repositorio de flujos (master + child).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient storage error: {0}")]
    Transient(String),
    #[error("storage error: {0}")]
    Internal(String),
}

/// Errores del gateway de cache distribuida.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable")]
    Unavailable,
    #[error("cache operation failed: {0}")]
    Operation(String),
}

/// Errores de un handler de fases.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// El handler no puede construirse todavía (dependencias ausentes).
    #[error("handler unavailable: {0}")]
    Unavailable(String),
    #[error("handler failed: {0}")]
    Failed(String),
}

/// Errores detectados al registrar tipos de flujo (configuración, no runtime).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("flow type already registered: {0}")]
    DuplicateFlowType(String),
    #[error("flow type {0} declares no phases")]
    NoPhases(String),
    #[error("flow type {flow_type}: first phase must be `initialization`, found `{found}`")]
    MissingInitialization { flow_type: String, found: String },
    #[error("flow type {flow_type}: duplicate phase `{phase}`")]
    DuplicatePhase { flow_type: String, phase: String },
    #[error("flow type {flow_type}: phase `{phase}` depends on undeclared or later phase `{dependency}`")]
    InvalidDependency { flow_type: String, phase: String, dependency: String },
}

/// Error público de las operaciones del orquestador.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("invalid flow type: {0}")]
    InvalidFlowType(String),
    #[error("invalid phase `{phase}` for flow type {flow_type}")]
    InvalidPhase { flow_type: String, phase: String },
    #[error("flow not found: {0}")]
    FlowNotFound(FlowId),
    #[error("flow {flow_id} is {status}; cannot {operation}")]
    InvalidState { flow_id: FlowId, status: FlowStatus, operation: String },
    #[error("dependencies not satisfied for phase `{phase}`: missing {missing:?}")]
    DependenciesNotSatisfied { phase: String, missing: Vec<String> },
    #[error("flow creation failed: {reason}")]
    FlowCreationFailed { reason: String, cleanup_errors: Vec<String> },
    #[error("phase `{phase}` failed: {reason}")]
    PhaseExecutionFailed { phase: String, reason: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Clase operativa de un error (decide reintentos y severidad de log).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    Conflict,
    Infrastructure,
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Conflict => "conflict",
            ErrorClass::Infrastructure => "infrastructure",
            ErrorClass::Fatal => "fatal",
        }
    }
}

/// Clasifica un error del orquestador.
pub fn classify_error(err: &OrchestratorError) -> ErrorClass {
    match err {
        OrchestratorError::InvalidFlowType(_)
        | OrchestratorError::InvalidPhase { .. }
        | OrchestratorError::DependenciesNotSatisfied { .. }
        | OrchestratorError::Validation(_) => ErrorClass::Validation,
        OrchestratorError::FlowNotFound(_) | OrchestratorError::Repository(RepositoryError::NotFound(_)) => {
            ErrorClass::NotFound
        }
        OrchestratorError::InvalidState { .. } | OrchestratorError::Repository(RepositoryError::Conflict(_)) => {
            ErrorClass::Conflict
        }
        OrchestratorError::Cache(_) | OrchestratorError::Repository(RepositoryError::Transient(_)) => {
            ErrorClass::Infrastructure
        }
        OrchestratorError::FlowCreationFailed { .. }
        | OrchestratorError::PhaseExecutionFailed { .. }
        | OrchestratorError::Handler(_)
        | OrchestratorError::Repository(RepositoryError::Internal(_)) => ErrorClass::Fatal,
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
