//! flow-adapters: tipos de flujo estándar.
//!
//! Provee los grafos de fases del catálogo (`catalog`), el handler estándar
//! (`handlers`) y `standard_registry`, que registra todo en un
//! `FlowTypeRegistry` listo para el orquestador.

pub mod catalog;
pub mod handlers;

use std::sync::Arc;

use flow_core::{FlowTypeConfig, FlowTypeRegistry, FlowTypeRegistryBuilder, RegistryError, SharedHandlerFactory};

use crate::catalog::{FlowTypeSpec, STANDARD_FLOW_TYPES};
use crate::handlers::StandardPhaseHandler;

/// Config de registro para un tipo del catálogo.
pub fn flow_type_config(spec: &'static FlowTypeSpec) -> FlowTypeConfig {
    let factory = SharedHandlerFactory::new(format!("{}_handler", spec.flow_type), StandardPhaseHandler::shared(spec));
    spec.phase_definitions()
        .into_iter()
        .fold(FlowTypeConfig::new(spec.flow_type, Arc::new(factory)), |config, phase| config.phase(phase))
        .display_name(spec.display_name)
        .mirrors_child_status(spec.mirrors_child_status)
}

/// Builder con los seis tipos estándar ya registrados; se pueden añadir
/// más antes de `build`.
pub fn standard_registry_builder() -> Result<FlowTypeRegistryBuilder, RegistryError> {
    STANDARD_FLOW_TYPES.iter()
                       .try_fold(FlowTypeRegistry::builder(), |builder, spec| builder.register(flow_type_config(spec)))
}

pub fn standard_registry() -> Result<FlowTypeRegistry, RegistryError> {
    Ok(standard_registry_builder()?.build())
}
