//! Configuración declarada por cada tipo de flujo.
use std::fmt;
use std::sync::Arc;

use super::FlowType;
use crate::handler::PhaseHandlerFactory;

/// Fase declarada con sus prerrequisitos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDefinition {
    pub name: String,
    pub description: String,
    pub dependencies: Vec<String>,
}

impl PhaseDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               description: String::new(),
               dependencies: Vec::new() }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.dependencies.extend(deps.iter().map(|d| d.to_string()));
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Clone)]
pub struct FlowTypeConfig {
    pub flow_type: FlowType,
    pub display_name: String,
    /// Fases en orden declarado; la primera es siempre `initialization`.
    pub phases: Vec<PhaseDefinition>,
    pub handler: Arc<dyn PhaseHandlerFactory>,
    /// La tabla child tiene columna de estado espejo.
    pub mirrors_child_status: bool,
}

impl fmt::Debug for FlowTypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowTypeConfig")
         .field("flow_type", &self.flow_type)
         .field("display_name", &self.display_name)
         .field("phases", &self.phase_names())
         .field("handler", &self.handler.handler_name())
         .field("mirrors_child_status", &self.mirrors_child_status)
         .finish()
    }
}

impl FlowTypeConfig {
    pub fn new(flow_type: FlowType, handler: Arc<dyn PhaseHandlerFactory>) -> Self {
        Self { flow_type,
               display_name: flow_type.as_str().to_string(),
               phases: Vec::new(),
               handler,
               mirrors_child_status: false }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn phase(mut self, phase: PhaseDefinition) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn mirrors_child_status(mut self, mirrors: bool) -> Self {
        self.mirrors_child_status = mirrors;
        self
    }

    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn phase_index(&self, phase: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.name == phase)
    }

    pub fn get_phase(&self, phase: &str) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|p| p.name == phase)
    }

    pub fn first_phase(&self) -> Option<&str> {
        self.phases.first().map(|p| p.name.as_str())
    }

    /// Fase declarada inmediatamente después de `phase`.
    pub fn next_phase_after(&self, phase: &str) -> Option<&str> {
        let idx = self.phase_index(phase)?;
        self.phases.get(idx + 1).map(|p| p.name.as_str())
    }

    pub fn dependencies_of(&self, phase: &str) -> &[String] {
        self.get_phase(phase).map(|p| p.dependencies.as_slice()).unwrap_or(&[])
    }
}
