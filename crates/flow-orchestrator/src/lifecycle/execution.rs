//! Ejecución de fases.
//!
//! Un único commit al final cubre desde la validación hasta la fusión del
//! resultado: si algo falla antes, no queda estado parcial. La escritura es
//! optimista sobre `Flow::revision`.
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, warn};
use serde_json::json;

use flow_core::constants::MAX_WRITE_ATTEMPTS;
use flow_core::{AuditCategory, AuditLevel, Flow, FlowId, FlowStatus, FlowTransaction, FlowTypeConfig,
                OrchestratorError, OrchestratorResult, PhaseCompletionEntry, PhaseOutcome, RepositoryError,
                TenantContext};

use super::results::{PhaseExecutionRequest, PhaseExecutionResult, PhaseExecutionStatus, ScheduledExecution};
use crate::audit::AuditEntry;
use crate::lock::PhaseLockGuard;
use crate::services::OrchestratorServices;
use crate::status_sync::StatusChange;

#[derive(Clone)]
pub struct ExecutionOperations {
    services: Arc<OrchestratorServices>,
}

impl ExecutionOperations {
    pub fn new(services: Arc<OrchestratorServices>) -> Self {
        Self { services }
    }

    /// Ejecuta la fase en la llamada actual. Si otra ejecución de la misma
    /// fase está en curso devuelve `DuplicateSkipped` sin tocar el handler.
    pub async fn execute_phase(&self,
                               ctx: &TenantContext,
                               flow_id: FlowId,
                               request: PhaseExecutionRequest)
                               -> OrchestratorResult<PhaseExecutionResult> {
        let Some(guard) = self.services.locks.try_lock(flow_id, &request.phase) else {
            self.services.audit.record(AuditEntry::success(flow_id,
                                                           "execute_phase",
                                                           AuditCategory::PhaseExecution,
                                                           ctx.actor())
                                       .with_level(AuditLevel::Warning)
                                       .with_details(json!({ "phase": request.phase, "outcome": "duplicate_skipped" })));
            return Ok(PhaseExecutionResult::skipped(flow_id, &request.phase, PhaseExecutionStatus::DuplicateSkipped));
        };
        self.run_locked(&guard, ctx, request).await
    }

    /// Toma el lock y ejecuta la fase en una tarea de fondo.
    pub fn schedule_phase_execution(&self,
                                    ctx: &TenantContext,
                                    flow_id: FlowId,
                                    request: PhaseExecutionRequest)
                                    -> ScheduledExecution {
        match self.services.locks.try_lock(flow_id, &request.phase) {
            Some(guard) => self.spawn_locked(guard, ctx.clone(), request),
            None => ScheduledExecution::AlreadyRunning { phase: request.phase },
        }
    }

    /// Lanza la ejecución con un lock ya adquirido; el guard viaja con la
    /// tarea y se libera al terminar.
    pub(crate) fn spawn_locked(&self,
                               guard: PhaseLockGuard,
                               ctx: TenantContext,
                               request: PhaseExecutionRequest)
                               -> ScheduledExecution {
        let this = self.clone();
        let phase = request.phase.clone();
        debug!("execute_phase:scheduled flow_id={} phase={phase}", guard.flow_id());
        let handle = tokio::spawn(async move {
            let result = this.run_locked(&guard, &ctx, request).await;
            drop(guard);
            result
        });
        ScheduledExecution::Scheduled { phase, handle }
    }

    pub(crate) async fn run_locked(&self,
                                   guard: &PhaseLockGuard,
                                   ctx: &TenantContext,
                                   request: PhaseExecutionRequest)
                                   -> OrchestratorResult<PhaseExecutionResult> {
        let flow_id = guard.flow_id();
        let span = self.services.performance.start_operation(Some(flow_id), "execute_phase");
        let phase = request.phase.clone();
        let forced = request.overrides.force_execution;

        match self.run(ctx, flow_id, request).await {
            Ok(result) => {
                self.services.performance.end_operation(span, true);
                if result.status == PhaseExecutionStatus::Completed {
                    self.services.invalidate(flow_id, "execute_phase").await;
                }
                self.services.audit.record(AuditEntry::success(flow_id,
                                                               "execute_phase",
                                                               AuditCategory::PhaseExecution,
                                                               ctx.actor())
                                           .with_details(json!({ "phase": phase,
                                                                 "outcome": result.status,
                                                                 "forced": forced,
                                                                 "duration_ms": result.duration_ms,
                                                                 "flow_status": result.flow_status })));
                Ok(result)
            }
            Err(e) => {
                self.services.performance.end_operation(span, false);
                self.services.audit.record(AuditEntry::failure(flow_id,
                                                               "execute_phase",
                                                               AuditCategory::PhaseExecution,
                                                               ctx.actor(),
                                                               &e)
                                           .with_details(json!({ "phase": phase, "forced": forced })));
                Err(e)
            }
        }
    }

    fn check_state(flow: &Flow, forced: bool) -> OrchestratorResult<()> {
        let blocked = match flow.flow_status {
            FlowStatus::Deleted => true,
            FlowStatus::Completed | FlowStatus::Cancelled | FlowStatus::Paused => !forced,
            _ => false,
        };
        if blocked {
            return Err(OrchestratorError::InvalidState { flow_id: flow.flow_id,
                                                         status: flow.flow_status,
                                                         operation: "execute_phase".into() });
        }
        Ok(())
    }

    async fn run(&self,
                 ctx: &TenantContext,
                 flow_id: FlowId,
                 request: PhaseExecutionRequest)
                 -> OrchestratorResult<PhaseExecutionResult> {
        let services = &self.services;
        let phase = request.phase.as_str();
        let overrides = request.overrides;
        let forced = overrides.force_execution;

        let mut flow = services.load_flow(&ctx.scope(), flow_id).await?;
        Self::check_state(&flow, forced)?;

        if !services.registry.is_phase_valid(flow.flow_type, phase) {
            return Err(OrchestratorError::InvalidPhase { flow_type: flow.flow_type.to_string(),
                                                         phase: phase.to_string() });
        }
        if !forced && !overrides.skip_dependency_check {
            let missing = services.registry.missing_dependencies(flow.flow_type, phase, &flow);
            if !missing.is_empty() {
                return Err(OrchestratorError::DependenciesNotSatisfied { phase: phase.to_string(),
                                                                         missing });
            }
        }
        if !forced && flow.persistence_data.is_phase_completed(phase) {
            debug!("execute_phase:already_completed flow_id={flow_id} phase={phase}");
            let summary = flow.persistence_data
                              .phase_completion
                              .get(phase)
                              .map(|e| e.summary.clone())
                              .unwrap_or_default();
            return Ok(PhaseExecutionResult::from_flow(&flow, phase, PhaseExecutionStatus::AlreadyCompleted, summary, 0));
        }

        let config = services.registry.require_config(flow.flow_type)?;
        let handler = config.handler.build()?;

        let started = Instant::now();
        let outcome = match handler.execute_phase(&flow, phase, &request.input).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("execute_phase:handler_failed flow_id={flow_id} phase={phase} err={e}");
                return Err(OrchestratorError::PhaseExecutionFailed { phase: phase.to_string(),
                                                                     reason: e.to_string() });
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        // Otra operación puede haber escrito el master mientras corría el
        // handler: ante conflicto se recarga y se reaplica sólo el delta propio.
        let started_status = flow.flow_status;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let previous_status = flow.flow_status;
            let mut tx = FlowTransaction::new();
            self.stage_outcome(&mut tx, &mut flow, config, phase, &outcome, forced, duration_ms, started_status, ctx.actor());
            match services.repository.commit(tx).await {
                Ok(()) => {
                    if flow.flow_status != previous_status {
                        services.status_sync.publish_status(&flow).await;
                    }
                    return Ok(PhaseExecutionResult::from_flow(&flow,
                                                              phase,
                                                              PhaseExecutionStatus::Completed,
                                                              outcome.summary,
                                                              duration_ms));
                }
                Err(RepositoryError::Conflict(msg)) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!("execute_phase:retry flow_id={flow_id} phase={phase} attempt={attempt} err={msg}");
                    flow = services.load_flow(&ctx.scope(), flow_id).await?;
                    if flow.flow_status == FlowStatus::Deleted {
                        warn!("execute_phase:discarded flow_id={flow_id} phase={phase} reason=deleted");
                        return Err(OrchestratorError::InvalidState { flow_id,
                                                                     status: flow.flow_status,
                                                                     operation: "execute_phase".into() });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Aplica el resultado de la fase sobre `flow` y lo deja en `tx`.
    ///
    /// Sólo un flujo activo avanza de estado; pausado, cancelado o completado
    /// se conservan. La excepción es un flujo que ya estaba pausado al lanzar
    /// una ejecución forzada: puede completarse.
    #[allow(clippy::too_many_arguments)]
    fn stage_outcome(&self,
                     tx: &mut FlowTransaction,
                     flow: &mut Flow,
                     config: &FlowTypeConfig,
                     phase: &str,
                     outcome: &PhaseOutcome,
                     forced: bool,
                     duration_ms: u64,
                     started_status: FlowStatus,
                     actor: &str) {
        let status_sync = &self.services.status_sync;
        let flow_id = flow.flow_id;
        let mut entry = PhaseCompletionEntry::completed_now(duration_ms, outcome.summary.clone());
        entry.forced = forced;
        flow.persistence_data.record_phase_completion(phase, entry);
        flow.persistence_data.merge_handler_payload(outcome.payload.clone());

        if let Some(next) = outcome.next_phase.as_deref() {
            if config.phase_index(next).is_some() {
                flow.current_phase = next.to_string();
            } else {
                warn!("execute_phase:ignored_next_phase flow_id={flow_id} next={next}");
            }
        }
        let phase_names = config.phase_names();
        let completed = phase_names.iter()
                                   .filter(|p| flow.persistence_data.is_phase_completed(p))
                                   .count();
        let derived = completed as f64 * 100.0 / phase_names.len().max(1) as f64;
        flow.set_progress(outcome.progress_percentage.unwrap_or(derived));
        flow.touch();

        let status = flow.flow_status;
        let advances = matches!(status,
                                FlowStatus::Initializing | FlowStatus::Running | FlowStatus::WaitingForApproval);
        let can_complete = advances || (status == FlowStatus::Paused && started_status == FlowStatus::Paused);
        if completed == phase_names.len() && can_complete {
            flow.set_progress(100.0);
            status_sync.stage_status_change(tx,
                                            flow,
                                            FlowStatus::Completed,
                                            &StatusChange::by(actor).because("all phases completed"));
        } else if !advances {
            debug!("execute_phase:status_kept flow_id={flow_id} status={status}");
            status_sync.stage_master_write(tx, flow);
        } else if outcome.requires_approval && status != FlowStatus::WaitingForApproval {
            status_sync.stage_status_change(tx,
                                            flow,
                                            FlowStatus::WaitingForApproval,
                                            &StatusChange::by(actor).because(format!("phase {phase} requires approval")));
        } else if matches!(status, FlowStatus::Initializing | FlowStatus::WaitingForApproval) && !outcome.requires_approval {
            status_sync.stage_status_change(tx, flow, FlowStatus::Running, &StatusChange::by(actor));
        } else {
            status_sync.stage_master_write(tx, flow);
        }
    }
}
