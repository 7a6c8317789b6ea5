//! Gateway de cache distribuida (capa 1 de invalidación).
//!
//! La cache es siempre opcional: cuando `is_available` es `false` el
//! orquestador sigue funcionando y lo deja reflejado en sus reportes.

mod memory;

pub use memory::InMemoryCacheGateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CacheError;
use crate::model::{Flow, FlowId, FlowStatus};
use crate::registry::FlowType;

/// Vista cacheada de un flujo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFlowEntry {
    pub flow_id: FlowId,
    pub flow_type: FlowType,
    pub flow_status: FlowStatus,
    pub current_phase: String,
    pub progress_percentage: f64,
    pub cached_at: DateTime<Utc>,
}

impl From<&Flow> for CachedFlowEntry {
    fn from(flow: &Flow) -> Self {
        Self { flow_id: flow.flow_id,
               flow_type: flow.flow_type,
               flow_status: flow.flow_status,
               current_phase: flow.current_phase.clone(),
               progress_percentage: flow.progress_percentage,
               cached_at: Utc::now() }
    }
}

#[async_trait]
pub trait CacheGateway: Send + Sync {
    fn is_available(&self) -> bool;

    /// Registra el flujo completo; falla entero o no deja rastro.
    async fn register_flow_atomic(&self, flow: &Flow) -> Result<(), CacheError>;

    async fn update_flow_status(&self, flow_id: FlowId, status: FlowStatus) -> Result<(), CacheError>;

    /// Limpia lo que una creación fallida haya podido dejar.
    async fn cleanup_partial_flow_registration(&self, flow_id: FlowId) -> Result<(), CacheError>;

    async fn invalidate_flow_cache(&self, flow_id: FlowId) -> Result<(), CacheError>;

    /// Reemplaza la entrada con el estado actual del flujo.
    async fn warm_flow(&self, flow: &Flow) -> Result<(), CacheError>;

    async fn get_cached_flow(&self, flow_id: FlowId) -> Result<Option<CachedFlowEntry>, CacheError>;
}
