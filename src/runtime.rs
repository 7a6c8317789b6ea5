//! Ensamblado del orquestador para procesos reales.
//!
//! `in_memory_orchestrator` usa los backends en memoria y el catálogo
//! estándar; con la feature `pg_demo`, `postgres_orchestrator` persiste en
//! Postgres a través de `flow-persistence`.
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use flow_adapters::standard_registry;
use flow_core::{FlowRepository, InMemoryFlowRepository, RegistryError, TenantContext};
use flow_orchestrator::MasterFlowOrchestrator;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("flow type registry: {0}")]
    Registry(#[from] RegistryError),
    #[cfg(feature = "pg_demo")]
    #[error("persistence: {0}")]
    Persistence(#[from] flow_persistence::PersistenceError),
}

/// Contexto de tenant con el actor configurado.
pub fn tenant_context(config: &AppConfig, client_account_id: Uuid, engagement_id: Uuid) -> TenantContext {
    TenantContext::new(client_account_id, engagement_id).with_user(config.actor.clone())
}

/// Orquestador sobre el repositorio indicado y el catálogo estándar.
pub fn build_orchestrator(config: &AppConfig,
                          context: TenantContext,
                          repository: Arc<dyn FlowRepository>)
                          -> Result<MasterFlowOrchestrator, RuntimeError> {
    let registry = standard_registry()?;
    log::debug!("runtime:build types={} actor={}", registry.flow_types().len(), context.actor());
    Ok(MasterFlowOrchestrator::builder(registry, context).repository(repository)
                                                         .config(config.to_orchestrator_config())
                                                         .build())
}

pub fn in_memory_orchestrator(config: &AppConfig, context: TenantContext) -> Result<MasterFlowOrchestrator, RuntimeError> {
    build_orchestrator(config, context, Arc::new(InMemoryFlowRepository::new()))
}

/// Orquestador persistido en Postgres (`DATABASE_URL`); aplica migraciones.
#[cfg(feature = "pg_demo")]
pub fn postgres_orchestrator(config: &AppConfig, context: TenantContext) -> Result<MasterFlowOrchestrator, RuntimeError> {
    let pool = flow_persistence::build_dev_pool_from_env()?;
    let repository = flow_persistence::PgFlowRepository::from_pool(pool);
    build_orchestrator(config, context, Arc::new(repository))
}
