//! Registro estático de tipos de flujo.
//!
//! Se construye una vez en el arranque (`FlowTypeRegistry::builder()`) y se
//! inyecta ya congelado en el orquestador; en runtime es de sólo lectura. La
//! validación de fases y dependencias ocurre al registrar: un tipo mal
//! declarado es un error de configuración, no un fallo en runtime.

mod config;
mod flow_type;

pub use config::{FlowTypeConfig, PhaseDefinition};
pub use flow_type::FlowType;

use std::collections::{HashMap, HashSet};

use crate::constants::INITIALIZATION_PHASE;
use crate::errors::{OrchestratorError, OrchestratorResult, RegistryError};
use crate::model::Flow;

/// Interfaz genérica clave -> binding.
pub trait Registry<K, V> {
    fn lookup(&self, key: &K) -> Option<&V>;
    fn keys(&self) -> Vec<K>;
}

#[derive(Debug, Default)]
pub struct FlowTypeRegistry {
    entries: HashMap<FlowType, FlowTypeConfig>,
}

impl Registry<FlowType, FlowTypeConfig> for FlowTypeRegistry {
    fn lookup(&self, key: &FlowType) -> Option<&FlowTypeConfig> {
        self.entries.get(key)
    }

    fn keys(&self) -> Vec<FlowType> {
        let mut keys: Vec<FlowType> = self.entries.keys().copied().collect();
        keys.sort();
        keys
    }
}

impl FlowTypeRegistry {
    pub fn builder() -> FlowTypeRegistryBuilder {
        FlowTypeRegistryBuilder::default()
    }

    pub fn is_registered(&self, flow_type: FlowType) -> bool {
        self.entries.contains_key(&flow_type)
    }

    /// Interpreta un tipo recibido como texto y exige que esté registrado.
    pub fn resolve(&self, raw: &str) -> OrchestratorResult<FlowType> {
        let flow_type: FlowType = raw.parse()?;
        if self.is_registered(flow_type) {
            Ok(flow_type)
        } else {
            Err(OrchestratorError::InvalidFlowType(raw.to_string()))
        }
    }

    pub fn get_config(&self, flow_type: FlowType) -> Option<&FlowTypeConfig> {
        self.entries.get(&flow_type)
    }

    pub fn require_config(&self, flow_type: FlowType) -> OrchestratorResult<&FlowTypeConfig> {
        self.get_config(flow_type)
            .ok_or_else(|| OrchestratorError::InvalidFlowType(flow_type.to_string()))
    }

    pub fn is_phase_valid(&self, flow_type: FlowType, phase: &str) -> bool {
        self.get_config(flow_type).map(|c| c.phase_index(phase).is_some()).unwrap_or(false)
    }

    /// Prerrequisitos de `phase` que aún no figuran en `phase_completion`.
    pub fn missing_dependencies(&self, flow_type: FlowType, phase: &str, flow: &Flow) -> Vec<String> {
        match self.get_config(flow_type) {
            Some(config) => config.dependencies_of(phase)
                                  .iter()
                                  .filter(|d| !flow.persistence_data.is_phase_completed(d))
                                  .cloned()
                                  .collect(),
            None => Vec::new(),
        }
    }

    pub fn are_dependencies_satisfied(&self, flow_type: FlowType, phase: &str, flow: &Flow) -> bool {
        self.missing_dependencies(flow_type, phase, flow).is_empty()
    }

    pub fn flow_types(&self) -> Vec<FlowType> {
        self.keys()
    }
}

#[derive(Debug, Default)]
pub struct FlowTypeRegistryBuilder {
    entries: HashMap<FlowType, FlowTypeConfig>,
}

impl FlowTypeRegistryBuilder {
    /// Registra un tipo validando su grafo de fases:
    /// - al menos una fase y la primera es `initialization`;
    /// - sin fases duplicadas;
    /// - cada dependencia apunta a una fase declarada ANTES.
    pub fn register(mut self, config: FlowTypeConfig) -> Result<Self, RegistryError> {
        let type_name = config.flow_type.to_string();
        if self.entries.contains_key(&config.flow_type) {
            return Err(RegistryError::DuplicateFlowType(type_name));
        }
        let first = config.first_phase().ok_or_else(|| RegistryError::NoPhases(type_name.clone()))?;
        if first != INITIALIZATION_PHASE {
            return Err(RegistryError::MissingInitialization { flow_type: type_name,
                                                              found: first.to_string() });
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for phase in &config.phases {
            for dep in &phase.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(RegistryError::InvalidDependency { flow_type: type_name,
                                                                  phase: phase.name.clone(),
                                                                  dependency: dep.clone() });
                }
            }
            if !seen.insert(phase.name.as_str()) {
                return Err(RegistryError::DuplicatePhase { flow_type: type_name,
                                                           phase: phase.name.clone() });
            }
        }
        log::debug!("registry:register flow_type={} phases={} handler={}",
                    config.flow_type,
                    config.phases.len(),
                    config.handler.handler_name());
        self.entries.insert(config.flow_type, config);
        Ok(self)
    }

    pub fn build(self) -> FlowTypeRegistry {
        FlowTypeRegistry { entries: self.entries }
    }
}
