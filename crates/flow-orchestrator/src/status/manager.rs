//! Consulta de estado con respaldo por descubrimiento.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

use flow_core::{Flow, FlowId, FlowStatus, FlowType, OrchestratorError, OrchestratorResult, PauseSnapshot,
                TenantContext};

use super::discovery::{DiscoveredFlow, SmartDiscoveryService};
use crate::services::OrchestratorServices;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    MasterRecord,
    /// Sintetizado desde un child huérfano.
    SmartDiscovery,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanSummary {
    pub count: usize,
    pub child_flow_ids: Vec<FlowId>,
    pub flow_types: Vec<FlowType>,
}

impl OrphanSummary {
    fn from_discovered(found: &[DiscoveredFlow]) -> Self {
        let mut flow_types: Vec<FlowType> = found.iter().map(|d| d.child.flow_type).collect();
        flow_types.sort();
        flow_types.dedup();
        Self { count: found.len(),
               child_flow_ids: found.iter().map(|d| d.child.flow_id).collect(),
               flow_types }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusMetadata {
    pub repair_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphan_summary: Option<OrphanSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowStatusReport {
    pub flow_id: FlowId,
    pub flow_type: FlowType,
    pub flow_name: Option<String>,
    pub flow_status: FlowStatus,
    pub current_phase: Option<String>,
    pub progress_percentage: f64,
    pub source: StatusSource,
    pub completed_phases: Vec<String>,
    pub pause_state: Option<PauseSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: StatusMetadata,
}

impl FlowStatusReport {
    fn from_master(flow: &Flow) -> Self {
        Self { flow_id: flow.flow_id,
               flow_type: flow.flow_type,
               flow_name: Some(flow.flow_name.clone()),
               flow_status: flow.flow_status,
               current_phase: Some(flow.current_phase.clone()),
               progress_percentage: flow.progress_percentage,
               source: StatusSource::MasterRecord,
               completed_phases: flow.persistence_data.completed_phases(),
               pause_state: flow.persistence_data.pause_state.clone(),
               created_at: flow.created_at,
               updated_at: flow.updated_at,
               metadata: StatusMetadata::default() }
    }

    /// Un estado espejo ausente o ilegible se informa como `initializing`.
    fn from_orphan(found: &DiscoveredFlow) -> Self {
        let child = &found.child;
        Self { flow_id: child.flow_id,
               flow_type: child.flow_type,
               flow_name: None,
               flow_status: child.parsed_status().unwrap_or(FlowStatus::Initializing),
               current_phase: child.current_phase.clone(),
               progress_percentage: child.progress_percentage,
               source: StatusSource::SmartDiscovery,
               completed_phases: Vec::new(),
               pause_state: None,
               created_at: child.created_at,
               updated_at: child.updated_at,
               metadata: StatusMetadata { repair_available: true,
                                          orphan_summary: Some(OrphanSummary::from_discovered(std::slice::from_ref(found))) } }
    }
}

#[derive(Clone)]
pub struct StatusManager {
    services: Arc<OrchestratorServices>,
    discovery: SmartDiscoveryService,
}

impl StatusManager {
    pub fn new(services: Arc<OrchestratorServices>, discovery: SmartDiscoveryService) -> Self {
        Self { services,
               discovery }
    }

    pub async fn get_flow_status(&self, ctx: &TenantContext, flow_id: FlowId, include_details: bool) -> OrchestratorResult<FlowStatusReport> {
        let scope = ctx.scope();
        let mut report = match self.services.read_flow(&scope, flow_id).await? {
            Some(flow) => FlowStatusReport::from_master(&flow),
            None => {
                debug!("get_flow_status:not_found flow_id={flow_id} trying discovery");
                match self.discovery.discover_orphaned_flow(&scope, flow_id).await? {
                    Some(found) => FlowStatusReport::from_orphan(&found),
                    None => return Err(OrchestratorError::FlowNotFound(flow_id)),
                }
            }
        };

        if include_details && report.source == StatusSource::MasterRecord {
            let related = self.discovery.find_related_orphans(&scope, flow_id).await?;
            if !related.is_empty() {
                report.metadata = StatusMetadata { repair_available: true,
                                                   orphan_summary: Some(OrphanSummary::from_discovered(&related)) };
            }
        }
        Ok(report)
    }
}
