//! Reparación guiada de datos huérfanos.
//!
//! Nunca automática: el operador elige una opción y cada ejecución queda
//! auditada.
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;

use flow_core::constants::INITIALIZATION_PHASE;
use flow_core::{AuditCategory, Flow, FlowId, FlowStatus, FlowTransaction, OrchestratorError, OrchestratorResult,
                PhaseCompletionEntry, TenantContext};

use super::discovery::{DiscoveredFlow, SmartDiscoveryService};
use crate::audit::AuditEntry;
use crate::services::OrchestratorServices;
use crate::status_sync::StatusChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairType {
    /// Sintetiza el master que falta y enlaza los children.
    CreateMasterFlow,
    /// Enlaza los children a un master existente.
    LinkToExistingMaster,
    MarkForDeletion,
}

impl RepairType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairType::CreateMasterFlow => "create_master_flow",
            RepairType::LinkToExistingMaster => "link_to_existing_master",
            RepairType::MarkForDeletion => "mark_for_deletion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairOption {
    pub repair_type: RepairType,
    pub description: String,
    pub target_items: Vec<FlowId>,
    pub creates_master: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairResult {
    pub flow_id: FlowId,
    pub repair_type: RepairType,
    pub repaired_items: Vec<FlowId>,
    /// Master creado por la reparación.
    pub created_master: Option<FlowId>,
}

#[derive(Clone)]
pub struct FlowRepairService {
    services: Arc<OrchestratorServices>,
    discovery: SmartDiscoveryService,
}

impl FlowRepairService {
    pub fn new(services: Arc<OrchestratorServices>, discovery: SmartDiscoveryService) -> Self {
        Self { services,
               discovery }
    }

    /// Opciones aplicables a lo descubierto para `flow_id`.
    pub async fn generate_repair_options(&self,
                                         ctx: &TenantContext,
                                         flow_id: FlowId,
                                         discovered: &[DiscoveredFlow])
                                         -> OrchestratorResult<Vec<RepairOption>> {
        if discovered.is_empty() {
            return Ok(Vec::new());
        }
        let targets: Vec<FlowId> = discovered.iter().map(|d| d.child.flow_id).collect();
        let master_exists = self.services.repository.get_by_flow_id(&ctx.scope(), flow_id).await?.is_some();

        let mut options = Vec::with_capacity(2);
        if master_exists {
            options.push(RepairOption { repair_type: RepairType::LinkToExistingMaster,
                                        description: format!("link {} orphaned record(s) to master {flow_id}",
                                                             targets.len()),
                                        target_items: targets.clone(),
                                        creates_master: false });
        } else {
            options.push(RepairOption { repair_type: RepairType::CreateMasterFlow,
                                        description: format!("create master {flow_id} from orphaned {} data",
                                                             discovered[0].child.flow_type),
                                        target_items: targets.clone(),
                                        creates_master: true });
        }
        options.push(RepairOption { repair_type: RepairType::MarkForDeletion,
                                    description: format!("mark {} orphaned record(s) for deletion", targets.len()),
                                    target_items: targets,
                                    creates_master: false });
        Ok(options)
    }

    /// Ejecuta la reparación elegida en una única transacción.
    ///
    /// `create_master_flow` permite que `LinkToExistingMaster` cree el master
    /// si no existe; `CreateMasterFlow` lo crea siempre.
    pub async fn repair_orphaned_data(&self,
                                      ctx: &TenantContext,
                                      flow_id: FlowId,
                                      repair_type: RepairType,
                                      target_items: &[FlowId],
                                      create_master_flow: bool)
                                      -> OrchestratorResult<RepairResult> {
        let result = self.apply(ctx, flow_id, repair_type, target_items, create_master_flow).await;
        let entry = match &result {
            Ok(r) => AuditEntry::success(flow_id, "repair_orphaned_data", AuditCategory::DataRepair, ctx.actor())
                         .with_details(json!({ "repair_type": repair_type,
                                               "repaired_items": r.repaired_items,
                                               "created_master": r.created_master })),
            Err(e) => AuditEntry::failure(flow_id, "repair_orphaned_data", AuditCategory::DataRepair, ctx.actor(), e)
                          .with_details(json!({ "repair_type": repair_type, "target_items": target_items })),
        };
        self.services.audit.record(entry);
        if result.is_ok() {
            self.services.invalidate(flow_id, "repair_orphaned_data").await;
        }
        result
    }

    async fn apply(&self,
                   ctx: &TenantContext,
                   flow_id: FlowId,
                   repair_type: RepairType,
                   target_items: &[FlowId],
                   create_master_flow: bool)
                   -> OrchestratorResult<RepairResult> {
        if target_items.is_empty() {
            return Err(OrchestratorError::Validation("repair requires at least one target item".into()));
        }
        let scope = ctx.scope();
        let mut targets = Vec::with_capacity(target_items.len());
        for id in target_items {
            match self.discovery.discover_orphaned_flow(&scope, *id).await? {
                Some(found) => targets.push(found),
                None => {
                    return Err(OrchestratorError::Validation(format!("{id} is not an orphaned record in this scope")))
                }
            }
        }

        let mut tx = FlowTransaction::new();
        let mut created_master = None;
        match repair_type {
            RepairType::MarkForDeletion => {
                for found in &targets {
                    tx.mark_child_for_deletion(found.child.flow_id);
                }
            }
            RepairType::CreateMasterFlow | RepairType::LinkToExistingMaster => {
                let existing = self.services.repository.get_by_flow_id(&scope, flow_id).await?;
                let (mut master, recovered_status) = match (existing, repair_type) {
                    (Some(_), RepairType::CreateMasterFlow) => {
                        return Err(OrchestratorError::Validation(format!("master {flow_id} already exists")));
                    }
                    (Some(master), _) => (master, None),
                    (None, RepairType::LinkToExistingMaster) if !create_master_flow => {
                        return Err(OrchestratorError::FlowNotFound(flow_id));
                    }
                    (None, _) => {
                        let (master, status) = self.synthesize_master(ctx, flow_id, &targets[0])?;
                        tx.insert_master(master.clone());
                        created_master = Some(flow_id);
                        (master, Some(status))
                    }
                };
                for found in &targets {
                    if found.child.flow_type != master.flow_type {
                        return Err(OrchestratorError::Validation(format!("{} is {} data, master is {}",
                                                                         found.child.flow_id,
                                                                         found.child.flow_type,
                                                                         master.flow_type)));
                    }
                    tx.link_child(found.child.flow_id, master.flow_id);
                }
                let status_sync = &self.services.status_sync;
                match recovered_status {
                    Some(status) => {
                        let change = StatusChange::by(ctx.actor()).because("master recreated from orphaned child data")
                                                                  .with_details(json!({ "repaired_items": targets.len() }));
                        status_sync.stage_status_change(&mut tx, &mut master, status, &change);
                    }
                    None => status_sync.stage_master_write(&mut tx, &mut master),
                }
            }
        }

        self.services.repository.commit(tx).await?;
        info!("repair:{} flow_id={flow_id} items={}", repair_type.as_str(), targets.len());
        Ok(RepairResult { flow_id,
                          repair_type,
                          repaired_items: targets.iter().map(|t| t.child.flow_id).collect(),
                          created_master })
    }

    /// Master reconstruido desde el child, todavía en `Initializing`, junto
    /// con el estado al que debe pasar: el del espejo cuando es legible; si
    /// no, pausado para que el operador lo reanude.
    fn synthesize_master(&self,
                         ctx: &TenantContext,
                         flow_id: FlowId,
                         found: &DiscoveredFlow)
                         -> OrchestratorResult<(Flow, FlowStatus)> {
        let child = &found.child;
        let config = self.services.registry.require_config(child.flow_type)?;
        let phase = child.current_phase
                         .as_deref()
                         .filter(|p| config.phase_index(p).is_some())
                         .unwrap_or(INITIALIZATION_PHASE);

        let mut flow = Flow::new(flow_id,
                                 child.flow_type,
                                 format!("Recovered {} flow", config.display_name),
                                 ctx.scope(),
                                 ctx.actor(),
                                 phase);
        let status = child.parsed_status()
                          .filter(|s| !s.is_terminal())
                          .unwrap_or(FlowStatus::Paused);
        flow.set_progress(child.progress_percentage);
        flow.created_at = child.created_at;
        flow.flow_metadata.repaired_from_orphan = true;
        flow.persistence_data
            .record_phase_completion(INITIALIZATION_PHASE,
                                     PhaseCompletionEntry::completed_now(0, json!({ "recovered_from": child.flow_id })));
        Ok((flow, status))
    }
}
