//! Registro master de un flujo.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{FlowId, FlowStatus, PersistenceData, TenantScope};
use crate::registry::FlowType;

/// Transición de estado registrada por el servicio de sincronización.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: FlowStatus,
    pub to: FlowStatus,
    pub at: DateTime<Utc>,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub details: Value,
}

/// Metadatos propios del orquestador (fuera de `persistence_data`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowMetadata {
    #[serde(default)]
    pub status_transitions: Vec<StatusTransition>,
    /// El registro fue sintetizado por una reparación de datos huérfanos.
    #[serde(default)]
    pub repaired_from_orphan: bool,
}

/// Una fila por instancia orquestada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub flow_id: FlowId,
    pub flow_type: FlowType,
    pub flow_name: String,
    pub flow_status: FlowStatus,
    pub current_phase: String,
    pub progress_percentage: f64,
    #[serde(default)]
    pub configuration: Map<String, Value>,
    #[serde(default)]
    pub persistence_data: PersistenceData,
    #[serde(default)]
    pub flow_metadata: FlowMetadata,
    pub client_account_id: uuid::Uuid,
    pub engagement_id: uuid::Uuid,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Versión optimista: cada `UpdateMaster` exige la revisión leída y la
    /// incrementa.
    #[serde(default)]
    pub revision: i64,
}

impl Flow {
    /// Registro recién creado en estado `initializing`.
    pub fn new(flow_id: FlowId,
               flow_type: FlowType,
               flow_name: impl Into<String>,
               scope: TenantScope,
               created_by: impl Into<String>,
               current_phase: impl Into<String>)
               -> Self {
        let now = Utc::now();
        Self { flow_id,
               flow_type,
               flow_name: flow_name.into(),
               flow_status: FlowStatus::Initializing,
               current_phase: current_phase.into(),
               progress_percentage: 0.0,
               configuration: Map::new(),
               persistence_data: PersistenceData::default(),
               flow_metadata: FlowMetadata::default(),
               client_account_id: scope.client_account_id,
               engagement_id: scope.engagement_id,
               created_by: created_by.into(),
               created_at: now,
               updated_at: now,
               revision: 0 }
    }

    pub fn scope(&self) -> TenantScope {
        TenantScope::new(self.client_account_id, self.engagement_id)
    }

    pub fn belongs_to(&self, scope: &TenantScope) -> bool {
        scope.contains(self.client_account_id, self.engagement_id)
    }

    /// Fija el progreso acotado a [0, 100].
    pub fn set_progress(&mut self, progress: f64) {
        self.progress_percentage = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 100.0) };
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
