//! Acceso persistente a registros master y child.
//!
//! Lecturas acotadas por tenant y un único
//! punto de escritura (`commit`) que aplica una `FlowTransaction` de forma
//! atómica.

mod memory;
mod query;
mod transaction;

pub use memory::InMemoryFlowRepository;
pub use query::FlowQuery;
pub use transaction::{apply_mirror, FlowTransaction, FlowWrite};

use async_trait::async_trait;

use crate::errors::RepositoryError;
use crate::model::{ChildFlowRecord, Flow, FlowId, TenantScope};

#[async_trait]
pub trait FlowRepository: Send + Sync {
    /// Master por id dentro del alcance (incluye flujos `deleted`).
    async fn get_by_flow_id(&self, scope: &TenantScope, flow_id: FlowId) -> Result<Option<Flow>, RepositoryError>;

    /// Masters que cumplen la consulta, más recientes primero.
    async fn list_flows(&self, query: &FlowQuery) -> Result<Vec<Flow>, RepositoryError>;

    /// Child cuyo `flow_id` coincide, dentro del alcance.
    async fn get_child(&self, scope: &TenantScope, flow_id: FlowId) -> Result<Option<ChildFlowRecord>, RepositoryError>;

    /// Children del alcance relacionados con `flow_id` (por id propio o por
    /// enlace al master).
    async fn find_related_children(&self,
                                   scope: &TenantScope,
                                   flow_id: FlowId)
                                   -> Result<Vec<ChildFlowRecord>, RepositoryError>;

    /// Todos los children del alcance (reconciliación y salud).
    async fn list_children(&self, scope: &TenantScope) -> Result<Vec<ChildFlowRecord>, RepositoryError>;

    /// Aplica todas las escrituras o ninguna.
    async fn commit(&self, tx: FlowTransaction) -> Result<(), RepositoryError>;
}
