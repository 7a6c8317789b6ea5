use uuid::Uuid;

use crate::model::{Flow, FlowStatus, TenantScope};
use crate::registry::FlowType;

/// Consulta de masters acotada por cliente (y opcionalmente engagement).
#[derive(Debug, Clone, PartialEq)]
pub struct FlowQuery {
    pub client_account_id: Uuid,
    pub engagement_id: Option<Uuid>,
    pub flow_type: Option<FlowType>,
    /// `None` = cualquier estado.
    pub statuses: Option<Vec<FlowStatus>>,
    pub include_deleted: bool,
    pub limit: usize,
}

impl FlowQuery {
    /// Todos los flujos del engagement del alcance.
    pub fn for_scope(scope: &TenantScope, limit: usize) -> Self {
        Self { client_account_id: scope.client_account_id,
               engagement_id: Some(scope.engagement_id),
               flow_type: None,
               statuses: None,
               include_deleted: false,
               limit }
    }

    /// Flujos activos (no terminales) del alcance.
    pub fn active(scope: &TenantScope, limit: usize) -> Self {
        let statuses = FlowStatus::ALL.into_iter().filter(|s| s.is_active()).collect();
        Self { statuses: Some(statuses),
               ..Self::for_scope(scope, limit) }
    }

    pub fn of_type(mut self, flow_type: Option<FlowType>) -> Self {
        self.flow_type = flow_type;
        self
    }

    /// Evaluación en memoria del filtro (backend in-memory y tests).
    pub fn matches(&self, flow: &Flow) -> bool {
        if flow.client_account_id != self.client_account_id {
            return false;
        }
        if let Some(engagement) = self.engagement_id {
            if flow.engagement_id != engagement {
                return false;
            }
        }
        if let Some(ft) = self.flow_type {
            if flow.flow_type != ft {
                return false;
            }
        }
        if !self.include_deleted && flow.flow_status == FlowStatus::Deleted {
            return false;
        }
        match &self.statuses {
            Some(statuses) => statuses.contains(&flow.flow_status),
            None => true,
        }
    }
}
