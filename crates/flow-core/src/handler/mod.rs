//! Seam entre el orquestador y la lógica de negocio de cada fase.
//!
//! El orquestador nunca ejecuta trabajo de negocio: invoca un
//! `PhaseHandler` y recibe un resultado. Cada tipo de flujo declara en el
//! registro una `PhaseHandlerFactory`; la factoría puede fallar
//! (dependencias aún no disponibles) y el orquestador lo tolera en la
//! inicialización.
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::HandlerError;
use crate::model::{Flow, PauseSnapshot};

/// Resultado de `PhaseHandler::initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseInitialization {
    /// Datos del registro child a crear junto con el master (si el tipo de
    /// flujo tiene tabla operativa).
    #[serde(default)]
    pub child_data: Option<Value>,
    /// Parche para `handler_payload`.
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub summary: Value,
    /// Inicialización sustituida por un no-op (handler no construible).
    #[serde(default)]
    pub fallback: bool,
}

impl PhaseInitialization {
    /// Resultado usado cuando el handler no puede construirse todavía.
    pub fn noop(reason: impl Into<String>) -> Self {
        Self { child_data: None,
               payload: Value::Null,
               summary: serde_json::json!({ "initialized": false, "reason": reason.into() }),
               fallback: true }
    }
}

/// Resultado de ejecutar una fase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    #[serde(default)]
    pub summary: Value,
    /// Parche para `handler_payload`.
    #[serde(default)]
    pub payload: Value,
    /// Fase siguiente señalada por el handler.
    #[serde(default)]
    pub next_phase: Option<String>,
    /// Progreso explícito; si falta se deriva de las fases completadas.
    #[serde(default)]
    pub progress_percentage: Option<f64>,
    /// El flujo queda esperando aprobación humana.
    #[serde(default)]
    pub requires_approval: bool,
}

impl PhaseOutcome {
    pub fn with_summary(summary: Value) -> Self {
        Self { summary,
               ..Self::default() }
    }

    pub fn advance_to(mut self, phase: impl Into<String>) -> Self {
        self.next_phase = Some(phase.into());
        self
    }
}

/// Contexto suministrado por el llamador al reanudar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeContext {
    #[serde(default)]
    pub reason: Option<String>,
    /// Re-ejecución forzada de una fase concreta.
    #[serde(default)]
    pub force_phase: Option<String>,
    #[serde(default)]
    pub user_input: Value,
}

/// Estado que recibe el handler al reanudar.
#[derive(Debug, Clone)]
pub struct ResumeState<'a> {
    pub flow: &'a Flow,
    pub pause_snapshot: Option<&'a PauseSnapshot>,
    pub context: &'a ResumeContext,
}

/// Qué hacer tras reanudar.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeDirective {
    /// Reanudar sin programar trabajo.
    Continue,
    /// Programar en segundo plano la ejecución de una fase.
    ExecutePhase { phase: String, input: Value },
}

#[async_trait]
pub trait PhaseHandler: Send + Sync {
    /// Preparación propia del tipo de flujo tras crear el master.
    async fn initialize(&self, flow: &Flow) -> Result<PhaseInitialization, HandlerError>;

    /// Ejecuta una fase con el input del llamador.
    async fn execute_phase(&self, flow: &Flow, phase: &str, input: &Value) -> Result<PhaseOutcome, HandlerError>;

    /// Reanudación desde el último estado conocido.
    async fn resume_from_state(&self, _state: ResumeState<'_>) -> Result<ResumeDirective, HandlerError> {
        Ok(ResumeDirective::Continue)
    }

    /// Prepara la re-ejecución forzada de una fase (limpieza propia del
    /// handler). La ejecución en sí la programa el orquestador.
    async fn force_rerun_phase(&self, _flow: &Flow, _phase: &str) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Binding declarado en el registro: construye el handler bajo demanda.
pub trait PhaseHandlerFactory: Send + Sync {
    fn handler_name(&self) -> &str;
    fn build(&self) -> Result<Arc<dyn PhaseHandler>, HandlerError>;
}

impl fmt::Debug for dyn PhaseHandlerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhaseHandlerFactory({})", self.handler_name())
    }
}

/// Factoría que comparte una única instancia ya construida.
pub struct SharedHandlerFactory {
    name: String,
    handler: Arc<dyn PhaseHandler>,
}

impl SharedHandlerFactory {
    pub fn new(name: impl Into<String>, handler: Arc<dyn PhaseHandler>) -> Self {
        Self { name: name.into(),
               handler }
    }
}

impl PhaseHandlerFactory for SharedHandlerFactory {
    fn handler_name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> Result<Arc<dyn PhaseHandler>, HandlerError> {
        Ok(self.handler.clone())
    }
}

/// Factoría basada en closure (construcción diferida).
pub struct FnHandlerFactory<F>
    where F: Fn() -> Result<Arc<dyn PhaseHandler>, HandlerError> + Send + Sync
{
    name: String,
    build: F,
}

impl<F> FnHandlerFactory<F> where F: Fn() -> Result<Arc<dyn PhaseHandler>, HandlerError> + Send + Sync
{
    pub fn new(name: impl Into<String>, build: F) -> Self {
        Self { name: name.into(),
               build }
    }
}

impl<F> PhaseHandlerFactory for FnHandlerFactory<F> where F: Fn() -> Result<Arc<dyn PhaseHandler>, HandlerError> + Send + Sync
{
    fn handler_name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> Result<Arc<dyn PhaseHandler>, HandlerError> {
        (self.build)()
    }
}
