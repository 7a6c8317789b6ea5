//! Pausa, reanudación y borrado lógico.
use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use serde_json::json;

use flow_core::constants::MAX_WRITE_ATTEMPTS;
use flow_core::{AuditCategory, AuditLevel, FlowId, FlowStatus, FlowTransaction, OrchestratorError,
                OrchestratorResult, PauseSnapshot, RepositoryError, ResumeContext, ResumeDirective, ResumeState,
                TenantContext};

use super::execution::ExecutionOperations;
use super::results::{DeleteOutcome, ExecutionOverrides, PauseOutcome, PhaseExecutionRequest, ResumeExecution,
                     ResumeOutcome, ScheduledExecution};
use crate::audit::AuditEntry;
use crate::services::OrchestratorServices;
use crate::status::SmartDiscoveryService;
use crate::status_sync::StatusChange;

#[derive(Clone)]
pub struct LifecycleOperations {
    services: Arc<OrchestratorServices>,
    execution: ExecutionOperations,
    discovery: SmartDiscoveryService,
}

impl LifecycleOperations {
    pub fn new(services: Arc<OrchestratorServices>,
               execution: ExecutionOperations,
               discovery: SmartDiscoveryService)
               -> Self {
        Self { services,
               execution,
               discovery }
    }

    /// Pausa idempotente: un flujo ya pausado o terminal devuelve
    /// `AlreadyPaused` sin escribir.
    pub async fn pause_flow(&self, ctx: &TenantContext, flow_id: FlowId, reason: Option<String>) -> OrchestratorResult<PauseOutcome> {
        let services = &self.services;
        let mut attempt = 0;
        let flow = loop {
            attempt += 1;
            let mut flow = match services.load_flow(&ctx.scope(), flow_id).await {
                Ok(flow) => flow,
                Err(e) => {
                    services.audit.record(AuditEntry::failure(flow_id,
                                                              "pause_flow",
                                                              AuditCategory::FlowLifecycle,
                                                              ctx.actor(),
                                                              &e));
                    return Err(e);
                }
            };

            if flow.flow_status == FlowStatus::Paused || flow.flow_status.is_terminal() {
                debug!("pause_flow:already_paused flow_id={flow_id} status={}", flow.flow_status);
                services.audit.record(AuditEntry::success(flow_id, "pause_flow", AuditCategory::FlowLifecycle, ctx.actor())
                                      .with_details(json!({ "outcome": "already_paused", "status": flow.flow_status })));
                return Ok(PauseOutcome::AlreadyPaused { flow_id,
                                                        status: flow.flow_status });
            }

            flow.persistence_data.record_pause(PauseSnapshot { preserved_at: Utc::now(),
                                                               current_phase: flow.current_phase.clone(),
                                                               progress_percentage: flow.progress_percentage,
                                                               flow_status: flow.flow_status,
                                                               reason: reason.clone() });
            let mut change = StatusChange::by(ctx.actor());
            if let Some(reason) = &reason {
                change = change.because(reason.clone());
            }
            let mut tx = FlowTransaction::new();
            services.status_sync.stage_status_change(&mut tx, &mut flow, FlowStatus::Paused, &change);
            match services.repository.commit(tx).await {
                Ok(()) => break flow,
                Err(RepositoryError::Conflict(msg)) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!("pause_flow:retry flow_id={flow_id} attempt={attempt} err={msg}");
                }
                Err(e) => {
                    services.audit.record(AuditEntry::failure(flow_id,
                                                              "pause_flow",
                                                              AuditCategory::FlowLifecycle,
                                                              ctx.actor(),
                                                              &e));
                    return Err(e.into());
                }
            }
        };
        services.status_sync.publish_status(&flow).await;
        services.invalidate(flow_id, "pause_flow").await;
        services.audit.record(AuditEntry::success(flow_id, "pause_flow", AuditCategory::FlowLifecycle, ctx.actor())
                              .with_details(json!({ "outcome": "paused",
                                                    "current_phase": flow.current_phase,
                                                    "reason": reason })));
        Ok(PauseOutcome::Paused { flow })
    }

    /// Reanuda un flujo. Los casos no reanudables son resultados, no
    /// errores.
    pub async fn resume_flow(&self, ctx: &TenantContext, flow_id: FlowId, resume: ResumeContext) -> OrchestratorResult<ResumeOutcome> {
        let services = &self.services;
        let scope = ctx.scope();

        let Some(mut flow) = services.repository.get_by_flow_id(&scope, flow_id).await? else {
            return self.resume_without_master(ctx, flow_id).await;
        };

        if !flow.flow_status.is_resumable() {
            let reason = format!("flow in status {} cannot be resumed", flow.flow_status);
            return Ok(self.resume_failed(ctx, flow_id, Some(flow.flow_status), reason));
        }

        let config = services.registry.require_config(flow.flow_type)?;
        if let Some(phase) = resume.force_phase.as_deref() {
            if config.phase_index(phase).is_none() {
                return Err(OrchestratorError::InvalidPhase { flow_type: flow.flow_type.to_string(),
                                                             phase: phase.to_string() });
            }
        }
        let handler = match config.handler.build() {
            Ok(handler) => handler,
            Err(e) => return Ok(self.resume_failed(ctx, flow_id, Some(flow.flow_status), e.to_string())),
        };

        let directive = match resume.force_phase.clone() {
            Some(phase) => {
                let rerun = handler.force_rerun_phase(&flow, &phase).await;
                rerun.map(|()| ResumeDirective::ExecutePhase { phase,
                                                               input: resume.user_input.clone() })
            }
            None => {
                let state = ResumeState { flow: &flow,
                                          pause_snapshot: flow.persistence_data.pause_state.as_ref(),
                                          context: &resume };
                handler.resume_from_state(state).await
            }
        };
        let directive = match directive {
            Ok(directive) => directive,
            Err(e) => return Ok(self.resume_failed(ctx, flow_id, Some(flow.flow_status), e.to_string())),
        };

        // Lock antes de escribir: una reanudación doble no programa la fase dos veces.
        let guard = match &directive {
            ResumeDirective::ExecutePhase { phase, .. } => match services.locks.try_lock(flow_id, phase) {
                Some(guard) => Some(guard),
                None => {
                    services.audit.record(AuditEntry::success(flow_id,
                                                              "resume_flow",
                                                              AuditCategory::FlowLifecycle,
                                                              ctx.actor())
                                          .with_level(AuditLevel::Warning)
                                          .with_details(json!({ "outcome": "already_running", "phase": phase })));
                    return Ok(ResumeOutcome::AlreadyRunning { flow_id,
                                                              phase: phase.clone() });
                }
            },
            ResumeDirective::Continue => None,
        };

        let previous = flow.flow_status;
        if previous != FlowStatus::Running {
            let mut change = StatusChange::by(ctx.actor());
            if let Some(reason) = &resume.reason {
                change = change.because(reason.clone());
            }
            let mut attempt = 0;
            loop {
                attempt += 1;
                let mut tx = FlowTransaction::new();
                services.status_sync.stage_status_change(&mut tx, &mut flow, FlowStatus::Running, &change);
                match services.repository.commit(tx).await {
                    Ok(()) => break,
                    Err(RepositoryError::Conflict(msg)) if attempt < MAX_WRITE_ATTEMPTS => {
                        debug!("resume_flow:retry flow_id={flow_id} attempt={attempt} err={msg}");
                        flow = services.load_flow(&scope, flow_id).await?;
                        if !flow.flow_status.is_resumable() {
                            let reason = format!("flow moved to status {} while resuming", flow.flow_status);
                            return Ok(self.resume_failed(ctx, flow_id, Some(flow.flow_status), reason));
                        }
                        if flow.flow_status == FlowStatus::Running {
                            break;
                        }
                    }
                    Err(e) => {
                        services.audit.record(AuditEntry::failure(flow_id,
                                                                  "resume_flow",
                                                                  AuditCategory::FlowLifecycle,
                                                                  ctx.actor(),
                                                                  &e));
                        return Err(e.into());
                    }
                }
            }
            services.status_sync.publish_status(&flow).await;
            services.invalidate(flow_id, "resume_flow").await;
        }

        let execution = match (directive, guard) {
            (ResumeDirective::ExecutePhase { phase, input }, Some(guard)) => {
                let request = PhaseExecutionRequest { phase,
                                                      input,
                                                      overrides: ExecutionOverrides { force_execution:
                                                                                          resume.force_phase.is_some(),
                                                                                      skip_dependency_check: false } };
                if services.config.background_execution {
                    match self.execution.spawn_locked(guard, ctx.clone(), request) {
                        ScheduledExecution::Scheduled { phase, handle } => ResumeExecution::Scheduled { phase, handle },
                        ScheduledExecution::AlreadyRunning { .. } => ResumeExecution::None,
                    }
                } else {
                    let result = self.execution.run_locked(&guard, ctx, request).await?;
                    ResumeExecution::Inline(Box::new(result))
                }
            }
            _ => ResumeExecution::None,
        };

        let scheduled_phase = match &execution {
            ResumeExecution::Scheduled { phase, .. } => Some(phase.clone()),
            ResumeExecution::Inline(result) => Some(result.phase.clone()),
            ResumeExecution::None => None,
        };
        services.audit.record(AuditEntry::success(flow_id, "resume_flow", AuditCategory::FlowLifecycle, ctx.actor())
                              .with_details(json!({ "outcome": "resumed",
                                                    "previous_status": previous,
                                                    "current_phase": flow.current_phase,
                                                    "phase": scheduled_phase,
                                                    "forced": resume.force_phase.is_some() })));
        Ok(ResumeOutcome::Resumed { flow, execution })
    }

    /// Sin master: si hay un child huérfano con ese id se guía hacia la
    /// reparación, si no es un not-found normal.
    async fn resume_without_master(&self, ctx: &TenantContext, flow_id: FlowId) -> OrchestratorResult<ResumeOutcome> {
        match self.discovery.discover_orphaned_flow(&ctx.scope(), flow_id).await? {
            Some(found) => {
                warn!("resume_flow:orphan_found flow_id={flow_id} type={}", found.child.flow_type);
                let message = format!("no master record for {flow_id}; orphaned {} data exists ({}). \
                                       Generate repair options and run repair_orphaned_data before resuming.",
                                      found.child.flow_type,
                                      found.reason);
                self.services.audit.record(AuditEntry::failure(flow_id,
                                                               "resume_flow",
                                                               AuditCategory::FlowLifecycle,
                                                               ctx.actor(),
                                                               "master record missing")
                                           .with_level(AuditLevel::Warning)
                                           .with_details(json!({ "outcome": "guidance",
                                                                 "child_flow_type": found.child.flow_type })));
                Ok(ResumeOutcome::Guidance { flow_id,
                                             flow_type: found.child.flow_type,
                                             message,
                                             repair_operation: "repair_orphaned_data".into() })
            }
            None => {
                let err = OrchestratorError::FlowNotFound(flow_id);
                self.services.audit.record(AuditEntry::failure(flow_id,
                                                               "resume_flow",
                                                               AuditCategory::FlowLifecycle,
                                                               ctx.actor(),
                                                               &err));
                Err(err)
            }
        }
    }

    fn resume_failed(&self, ctx: &TenantContext, flow_id: FlowId, status: Option<FlowStatus>, reason: String) -> ResumeOutcome {
        self.services.audit.record(AuditEntry::failure(flow_id,
                                                       "resume_flow",
                                                       AuditCategory::FlowLifecycle,
                                                       ctx.actor(),
                                                       &reason)
                                   .with_level(AuditLevel::Warning)
                                   .with_details(json!({ "outcome": "resume_failed", "status": status })));
        ResumeOutcome::Failed { flow_id,
                                status,
                                reason }
    }

    /// Borrado lógico: estado `deleted` y las tres capas de cache
    /// invalidadas. La fila nunca se elimina.
    pub async fn delete_flow(&self, ctx: &TenantContext, flow_id: FlowId, reason: Option<String>) -> OrchestratorResult<DeleteOutcome> {
        let services = &self.services;
        let mut attempt = 0;
        let (flow, already_deleted) = loop {
            attempt += 1;
            let mut flow = match services.load_flow(&ctx.scope(), flow_id).await {
                Ok(flow) => flow,
                Err(e) => {
                    services.audit.record(AuditEntry::failure(flow_id,
                                                              "delete_flow",
                                                              AuditCategory::FlowLifecycle,
                                                              ctx.actor(),
                                                              &e));
                    return Err(e);
                }
            };
            if flow.flow_status == FlowStatus::Deleted {
                break (flow, true);
            }

            let mut change = StatusChange::by(ctx.actor());
            if let Some(reason) = &reason {
                change = change.because(reason.clone());
            }
            let mut tx = FlowTransaction::new();
            services.status_sync.stage_status_change(&mut tx, &mut flow, FlowStatus::Deleted, &change);
            match services.repository.commit(tx).await {
                Ok(()) => break (flow, false),
                Err(RepositoryError::Conflict(msg)) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!("delete_flow:retry flow_id={flow_id} attempt={attempt} err={msg}");
                }
                Err(e) => {
                    services.audit.record(AuditEntry::failure(flow_id,
                                                              "delete_flow",
                                                              AuditCategory::FlowLifecycle,
                                                              ctx.actor(),
                                                              &e));
                    return Err(e.into());
                }
            }
        };

        let invalidation = services.invalidate(flow_id, "delete_flow").await;
        services.session.forget(flow_id);
        services.audit.record(AuditEntry::success(flow_id, "delete_flow", AuditCategory::FlowLifecycle, ctx.actor())
                              .with_details(json!({ "already_deleted": already_deleted,
                                                    "reason": reason,
                                                    "invalidation": invalidation })));
        Ok(DeleteOutcome { flow,
                           already_deleted,
                           invalidation })
    }
}
