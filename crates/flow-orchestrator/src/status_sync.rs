//! Sincronización de estado master/child.
//!
//! Único punto de escritura de `flow_status`: cada cambio actualiza el
//! master, replica estado/fase/progreso en el child (si el tipo lo declara)
//! y anota la transición en `flow_metadata`, todo en la misma transacción.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;
use serde_json::{json, Value};

use flow_core::constants::MAX_WRITE_ATTEMPTS;
use flow_core::{AuditCategory, AuditLevel, CacheGateway, ChildFlowRecord, Flow, FlowId, FlowQuery, FlowRepository,
                FlowStatus, FlowTransaction, FlowTypeRegistry, OrchestratorError, OrchestratorResult,
                RepositoryError, StatusTransition, TenantScope};

use crate::audit::{AuditEntry, AuditLogger};

/// Datos de la transición que acompañan al nuevo estado.
#[derive(Debug, Clone, Default)]
pub struct StatusChange {
    pub actor: String,
    pub reason: Option<String>,
    pub details: Value,
}

impl StatusChange {
    pub fn by(actor: &str) -> Self {
        Self { actor: actor.to_string(),
               ..Self::default() }
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Corrección aplicada por la reconciliación.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCorrection {
    pub flow_id: FlowId,
    pub child_flow_id: FlowId,
    pub master_status: FlowStatus,
    pub child_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub checked: usize,
    pub corrections: Vec<StatusCorrection>,
    /// Children sin master alcanzable; se reportan, no se tocan.
    pub orphans: Vec<FlowId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StuckFlow {
    pub flow_id: FlowId,
    pub current_phase: String,
    pub idle_secs: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowHealthReport {
    pub total_flows: usize,
    pub drifted: Vec<FlowId>,
    pub stuck: Vec<StuckFlow>,
    pub orphan_count: usize,
}

impl FlowHealthReport {
    pub fn is_healthy(&self) -> bool {
        self.drifted.is_empty() && self.stuck.is_empty() && self.orphan_count == 0
    }
}

struct DriftScan {
    drifted: Vec<(Flow, ChildFlowRecord)>,
    orphans: Vec<FlowId>,
    checked: usize,
}

#[derive(Clone)]
pub struct StatusSyncService {
    repository: Arc<dyn FlowRepository>,
    registry: Arc<FlowTypeRegistry>,
    gateway: Arc<dyn CacheGateway>,
    audit: AuditLogger,
}

impl StatusSyncService {
    pub fn new(repository: Arc<dyn FlowRepository>,
               registry: Arc<FlowTypeRegistry>,
               gateway: Arc<dyn CacheGateway>,
               audit: AuditLogger)
               -> Self {
        Self { repository,
               registry,
               gateway,
               audit }
    }

    fn mirrors(&self, flow: &Flow) -> bool {
        self.registry.get_config(flow.flow_type).is_some_and(|c| c.mirrors_child_status)
    }

    /// Escribe el master (sin cambio de estado) y replica fase/progreso.
    pub fn stage_master_write(&self, tx: &mut FlowTransaction, flow: &mut Flow) {
        tx.update_master(flow);
        if self.mirrors(flow) {
            tx.mirror_child_status(flow);
        }
    }

    /// Aplica el cambio de estado sobre `flow` y lo deja preparado en `tx`.
    pub fn stage_status_change(&self,
                               tx: &mut FlowTransaction,
                               flow: &mut Flow,
                               new_status: FlowStatus,
                               change: &StatusChange)
                               -> StatusTransition {
        let transition = StatusTransition { from: flow.flow_status,
                                            to: new_status,
                                            at: Utc::now(),
                                            actor: change.actor.clone(),
                                            reason: change.reason.clone(),
                                            details: change.details.clone() };
        flow.flow_status = new_status;
        flow.flow_metadata.status_transitions.push(transition.clone());
        flow.touch();
        self.stage_master_write(tx, flow);
        debug!("status_sync:staged flow_id={} {}->{}", flow.flow_id, transition.from, transition.to);
        transition
    }

    /// Actualiza la cache distribuida tras un commit. Nunca falla.
    pub async fn publish_status(&self, flow: &Flow) {
        if !self.gateway.is_available() {
            return;
        }
        if let Err(e) = self.gateway.update_flow_status(flow.flow_id, flow.flow_status).await {
            warn!("status_sync:cache_update_failed flow_id={} err={e}", flow.flow_id);
        }
    }

    /// Entrada única para cambiar el estado de un master ya persistido.
    pub async fn update_master_flow_status(&self,
                                           scope: &TenantScope,
                                           flow_id: FlowId,
                                           new_status: FlowStatus,
                                           change: StatusChange)
                                           -> OrchestratorResult<Flow> {
        let mut attempt = 0;
        let (flow, transition) = loop {
            attempt += 1;
            let mut flow = self.repository
                               .get_by_flow_id(scope, flow_id)
                               .await?
                               .ok_or(OrchestratorError::FlowNotFound(flow_id))?;
            let mut tx = FlowTransaction::new();
            let transition = self.stage_status_change(&mut tx, &mut flow, new_status, &change);
            match self.repository.commit(tx).await {
                Ok(()) => break (flow, transition),
                Err(RepositoryError::Conflict(msg)) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!("update_master_flow_status:retry flow_id={flow_id} attempt={attempt} err={msg}");
                }
                Err(e) => {
                    self.audit.record(AuditEntry::failure(flow_id,
                                                          "update_master_flow_status",
                                                          AuditCategory::StatusSync,
                                                          &change.actor,
                                                          &e));
                    return Err(e.into());
                }
            }
        };
        self.publish_status(&flow).await;
        self.audit.record(AuditEntry::success(flow_id,
                                              "update_master_flow_status",
                                              AuditCategory::StatusSync,
                                              &change.actor)
                          .with_details(json!({ "from": transition.from, "to": transition.to })));
        Ok(flow)
    }

    /// Children del alcance cuyo estado espejo difiere del master.
    async fn scan_drift(&self, scope: &TenantScope) -> OrchestratorResult<DriftScan> {
        let children = self.repository.list_children(scope).await?;
        let mut drifted = Vec::new();
        let mut orphans = Vec::new();
        let mut checked = 0;
        for child in children {
            let Some(master_id) = child.master_flow_id else {
                orphans.push(child.flow_id);
                continue;
            };
            let Some(master) = self.repository.get_by_flow_id(scope, master_id).await? else {
                orphans.push(child.flow_id);
                continue;
            };
            if !self.mirrors(&master) {
                continue;
            }
            checked += 1;
            let status_matches = child.parsed_status() == Some(master.flow_status);
            let phase_matches = child.current_phase.as_deref() == Some(master.current_phase.as_str());
            if !status_matches || !phase_matches {
                drifted.push((master, child));
            }
        }
        Ok(DriftScan { drifted,
                       orphans,
                       checked })
    }

    /// Corrige la deriva master/child en una sola transacción.
    pub async fn reconcile_flow_status(&self, scope: &TenantScope, actor: &str) -> OrchestratorResult<ReconciliationReport> {
        let DriftScan { drifted, orphans, checked } = self.scan_drift(scope).await?;
        let mut report = ReconciliationReport { checked,
                                                orphans,
                                                ..ReconciliationReport::default() };
        if drifted.is_empty() {
            return Ok(report);
        }
        let mut tx = FlowTransaction::new();
        for (master, child) in &drifted {
            tx.mirror_child_status(master);
            warn!("reconcile:drift flow_id={} master={} child={}",
                  master.flow_id,
                  master.flow_status,
                  child.status.as_deref().unwrap_or("-"));
            report.corrections.push(StatusCorrection { flow_id: master.flow_id,
                                                       child_flow_id: child.flow_id,
                                                       master_status: master.flow_status,
                                                       child_status: child.status.clone() });
        }
        self.repository.commit(tx).await?;
        for correction in &report.corrections {
            self.audit.record(AuditEntry::success(correction.flow_id,
                                                  "reconcile_flow_status",
                                                  AuditCategory::StatusSync,
                                                  actor)
                              .with_level(AuditLevel::Warning)
                              .with_details(json!({ "child_flow_id": correction.child_flow_id,
                                                    "child_status": correction.child_status,
                                                    "master_status": correction.master_status })));
        }
        Ok(report)
    }

    /// Foto de salud del alcance: deriva, flujos atascados y huérfanos.
    pub async fn monitor_flow_health(&self, scope: &TenantScope, stuck_threshold: Duration) -> OrchestratorResult<FlowHealthReport> {
        let flows = self.repository.list_flows(&FlowQuery::for_scope(scope, usize::MAX)).await?;
        let DriftScan { drifted, orphans, .. } = self.scan_drift(scope).await?;
        let threshold = chrono::Duration::from_std(stuck_threshold).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let stuck = flows.iter()
                         .filter(|f| f.flow_status == FlowStatus::Running)
                         .filter(|f| now.signed_duration_since(f.updated_at) > threshold)
                         .map(|f| StuckFlow { flow_id: f.flow_id,
                                              current_phase: f.current_phase.clone(),
                                              idle_secs: now.signed_duration_since(f.updated_at).num_seconds() })
                         .collect();
        Ok(FlowHealthReport { total_flows: flows.len(),
                              drifted: drifted.into_iter().map(|(m, _)| m.flow_id).collect(),
                              stuck,
                              orphan_count: orphans.len() })
    }
}
