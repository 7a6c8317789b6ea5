//! Registro operativo child (uno a uno con el master vía `master_flow_id`).
//!
//! Pertenece al repositorio del tipo de flujo. Un child sin master, con un
//! master inexistente o con un master de otro tenant es un huérfano: se
//! detecta y se repara, nunca se descarta en silencio.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FlowId, FlowStatus, TenantScope};
use crate::registry::FlowType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildFlowRecord {
    pub flow_id: FlowId,
    #[serde(default)]
    pub master_flow_id: Option<FlowId>,
    pub flow_type: FlowType,
    pub client_account_id: uuid::Uuid,
    pub engagement_id: uuid::Uuid,
    /// Espejo del estado del master; `None` si la tabla no tiene columna de
    /// estado.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub current_phase: Option<String>,
    #[serde(default)]
    pub progress_percentage: f64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub marked_for_deletion: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChildFlowRecord {
    pub fn new(flow_id: FlowId, flow_type: FlowType, scope: TenantScope, data: Value) -> Self {
        let now = Utc::now();
        Self { flow_id,
               master_flow_id: Some(flow_id),
               flow_type,
               client_account_id: scope.client_account_id,
               engagement_id: scope.engagement_id,
               status: None,
               current_phase: None,
               progress_percentage: 0.0,
               data,
               marked_for_deletion: false,
               created_at: now,
               updated_at: now }
    }

    pub fn scope(&self) -> TenantScope {
        TenantScope::new(self.client_account_id, self.engagement_id)
    }

    /// Estado espejo interpretado; los valores desconocidos se ignoran.
    pub fn parsed_status(&self) -> Option<FlowStatus> {
        self.status.as_deref().and_then(|s| s.parse().ok())
    }

    /// `true` si el registro no declara enlace al master.
    pub fn is_unlinked(&self) -> bool {
        self.master_flow_id.is_none()
    }
}
