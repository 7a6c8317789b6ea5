//! Búsqueda de datos huérfanos en las tablas child.
use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::Serialize;

use flow_core::{ChildFlowRecord, FlowId, FlowRepository, OrchestratorResult, TenantScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrphanReason {
    /// El child no declara master.
    Unlinked,
    /// El master declarado no existe en este alcance.
    MissingMaster { master_flow_id: FlowId },
}

impl fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrphanReason::Unlinked => write!(f, "no master link"),
            OrphanReason::MissingMaster { master_flow_id } => write!(f, "master {master_flow_id} not found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredFlow {
    pub child: ChildFlowRecord,
    pub reason: OrphanReason,
}

#[derive(Clone)]
pub struct SmartDiscoveryService {
    repository: Arc<dyn FlowRepository>,
}

impl SmartDiscoveryService {
    pub fn new(repository: Arc<dyn FlowRepository>) -> Self {
        Self { repository }
    }

    /// `Some` si el child es huérfano dentro del alcance.
    async fn classify(&self, scope: &TenantScope, child: ChildFlowRecord) -> OrchestratorResult<Option<DiscoveredFlow>> {
        if child.marked_for_deletion {
            return Ok(None);
        }
        let reason = match child.master_flow_id {
            None => OrphanReason::Unlinked,
            Some(master_flow_id) => {
                if self.repository.get_by_flow_id(scope, master_flow_id).await?.is_some() {
                    return Ok(None);
                }
                OrphanReason::MissingMaster { master_flow_id }
            }
        };
        Ok(Some(DiscoveredFlow { child, reason }))
    }

    /// Child huérfano con id `flow_id`, si existe.
    pub async fn discover_orphaned_flow(&self, scope: &TenantScope, flow_id: FlowId) -> OrchestratorResult<Option<DiscoveredFlow>> {
        let Some(child) = self.repository.get_child(scope, flow_id).await? else {
            return Ok(None);
        };
        let found = self.classify(scope, child).await?;
        if found.is_some() {
            debug!("discovery:orphan flow_id={flow_id}");
        }
        Ok(found)
    }

    /// Huérfanos relacionados con `flow_id` (por id propio o enlace).
    pub async fn find_related_orphans(&self, scope: &TenantScope, flow_id: FlowId) -> OrchestratorResult<Vec<DiscoveredFlow>> {
        let mut found = Vec::new();
        for child in self.repository.find_related_children(scope, flow_id).await? {
            if let Some(orphan) = self.classify(scope, child).await? {
                found.push(orphan);
            }
        }
        Ok(found)
    }

    /// Todos los huérfanos del alcance.
    pub async fn scan_orphans(&self, scope: &TenantScope) -> OrchestratorResult<Vec<DiscoveredFlow>> {
        let mut found = Vec::new();
        for child in self.repository.list_children(scope).await? {
            if let Some(orphan) = self.classify(scope, child).await? {
                found.push(orphan);
            }
        }
        Ok(found)
    }
}
