//! Creación de flujos.
//!
//! Orden: validar tipo, registrar en cache (con un reintento), inicializar
//! el handler, preparar master + child en la transacción y confirmar. Un
//! fallo tras generar el id dispara la compensación completa.
use std::sync::Arc;

use log::{debug, warn};
use serde_json::json;

use flow_core::constants::INITIALIZATION_PHASE;
use flow_core::{AuditCategory, ChildFlowRecord, Flow, FlowId, FlowStatus, FlowTransaction, FlowTypeConfig,
                OrchestratorError, OrchestratorResult, PhaseCompletionEntry, PhaseInitialization, TenantContext};

use super::results::{CreateFlowRequest, CreatedFlow};
use crate::audit::AuditEntry;
use crate::services::OrchestratorServices;

#[derive(Clone)]
pub struct CreationOperations {
    services: Arc<OrchestratorServices>,
}

impl CreationOperations {
    pub fn new(services: Arc<OrchestratorServices>) -> Self {
        Self { services }
    }

    /// Crea y confirma el flujo.
    pub async fn create_flow(&self, ctx: &TenantContext, request: CreateFlowRequest) -> OrchestratorResult<CreatedFlow> {
        let mut tx = FlowTransaction::new();
        let created = self.stage(&mut tx, ctx, request).await?;
        let span = self.services.performance.start_operation(Some(created.flow_id), "create_flow:commit");

        if let Err(e) = self.services.repository.commit(tx).await {
            self.services.performance.end_operation(span, false);
            return Err(self.compensate(ctx, created.flow_id, e.to_string(), true).await);
        }
        self.services.performance.end_operation(span, true);

        if created.cache_registered {
            if let Err(e) = self.services.gateway.warm_flow(&created.flow).await {
                warn!("create_flow:warm_failed flow_id={} err={e}", created.flow_id);
            }
        }
        self.audit_created(ctx, &created, false);
        Ok(created)
    }

    /// Prepara la creación dentro de una transacción del llamador, que es
    /// quien confirma. Si el commit del llamador falla, la entrada de cache
    /// debe limpiarse con `cleanup_partial_flow_registration`.
    pub async fn create_flow_in(&self,
                                tx: &mut FlowTransaction,
                                ctx: &TenantContext,
                                request: CreateFlowRequest)
                                -> OrchestratorResult<CreatedFlow> {
        let created = self.stage(tx, ctx, request).await?;
        self.audit_created(ctx, &created, true);
        Ok(created)
    }

    fn audit_created(&self, ctx: &TenantContext, created: &CreatedFlow, atomic: bool) {
        self.services.audit.record(AuditEntry::success(created.flow_id,
                                                       "create_flow",
                                                       AuditCategory::FlowLifecycle,
                                                       ctx.actor())
                                   .with_details(json!({ "flow_type": created.flow.flow_type,
                                                         "flow_name": created.flow.flow_name,
                                                         "atomic": atomic,
                                                         "cache_registered": created.cache_registered,
                                                         "initialization_fallback": created.initialization.fallback })));
    }

    async fn stage(&self,
                   tx: &mut FlowTransaction,
                   ctx: &TenantContext,
                   request: CreateFlowRequest)
                   -> OrchestratorResult<CreatedFlow> {
        let flow_type = match self.services.registry.resolve(&request.flow_type) {
            Ok(ft) => ft,
            Err(e) => {
                debug!("create_flow:rejected flow_type={} err={e}", request.flow_type);
                return Err(e);
            }
        };
        let config = self.services.registry.require_config(flow_type)?;
        let flow_id = FlowId::new();
        let span = self.services.performance.start_operation(Some(flow_id), "create_flow");

        let mut flow = Flow::new(flow_id,
                                 flow_type,
                                 request.flow_name.unwrap_or_else(|| format!("{} flow", config.display_name)),
                                 ctx.scope(),
                                 ctx.actor(),
                                 INITIALIZATION_PHASE);
        flow.flow_status = FlowStatus::Running;
        if let Some(configuration) = request.configuration {
            flow.configuration = configuration;
        }
        if let Some(state) = request.initial_state {
            flow.persistence_data.merge_handler_payload(state);
        }

        let cache_registered = self.register_in_cache(&flow).await;

        let initialization = match self.initialize(config, &flow).await {
            Ok(init) => init,
            Err(e) => {
                self.services.performance.end_operation(span, false);
                return Err(self.compensate(ctx, flow_id, e.to_string(), false).await);
            }
        };

        flow.persistence_data.merge_handler_payload(initialization.payload.clone());
        flow.persistence_data
            .record_phase_completion(INITIALIZATION_PHASE,
                                     PhaseCompletionEntry::completed_now(0, initialization.summary.clone()));
        tx.insert_master(flow.clone());

        if let Some(child_data) = initialization.child_data.clone() {
            let mut child = ChildFlowRecord::new(flow_id, flow_type, ctx.scope(), child_data);
            if config.mirrors_child_status {
                child.status = Some(flow.flow_status.as_str().to_string());
                child.current_phase = Some(flow.current_phase.clone());
                child.progress_percentage = flow.progress_percentage;
            }
            tx.insert_child(child);
        }

        self.services.performance.end_operation(span, true);
        debug!("create_flow:staged flow_id={flow_id} type={flow_type}");
        Ok(CreatedFlow { flow_id,
                         flow,
                         cache_registered,
                         initialization })
    }

    /// Registro best-effort: limpia, espera y reintenta una vez. Si la cache
    /// no está disponible se sigue sin ella.
    async fn register_in_cache(&self, flow: &Flow) -> bool {
        let gateway = &self.services.gateway;
        if !gateway.is_available() {
            warn!("create_flow:cache_unavailable flow_id={} proceeding without cache", flow.flow_id);
            return false;
        }
        let Err(first) = gateway.register_flow_atomic(flow).await else {
            return true;
        };
        warn!("create_flow:cache_register_failed flow_id={} err={first} retrying", flow.flow_id);
        if let Err(e) = gateway.cleanup_partial_flow_registration(flow.flow_id).await {
            warn!("create_flow:cache_cleanup_failed flow_id={} err={e}", flow.flow_id);
        }
        tokio::time::sleep(self.services.config.cache_retry_delay).await;
        match gateway.register_flow_atomic(flow).await {
            Ok(()) => true,
            Err(e) => {
                warn!("create_flow:cache_register_abandoned flow_id={} err={e}", flow.flow_id);
                if let Err(e) = gateway.cleanup_partial_flow_registration(flow.flow_id).await {
                    warn!("create_flow:cache_cleanup_failed flow_id={} err={e}", flow.flow_id);
                }
                false
            }
        }
    }

    /// Un handler que no puede construirse degrada a inicialización no-op;
    /// un handler construido que falla al inicializar aborta la creación.
    async fn initialize(&self, config: &FlowTypeConfig, flow: &Flow) -> OrchestratorResult<PhaseInitialization> {
        let handler = match config.handler.build() {
            Ok(handler) => handler,
            Err(e) => {
                warn!("create_flow:handler_unavailable flow_id={} handler={} err={e}",
                      flow.flow_id,
                      config.handler.handler_name());
                return Ok(PhaseInitialization::noop(e.to_string()));
            }
        };
        Ok(handler.initialize(flow).await?)
    }

    /// Compensación best-effort. Cada paso es independiente y sus fallos se
    /// recogen sin ocultar el error original.
    async fn compensate(&self, ctx: &TenantContext, flow_id: FlowId, reason: String, persisted: bool) -> OrchestratorError {
        let mut cleanup_errors = Vec::new();

        if persisted {
            let mut undo = FlowTransaction::new();
            undo.discard_child(flow_id);
            undo.discard_master(flow_id);
            if let Err(e) = self.services.repository.commit(undo).await {
                cleanup_errors.push(format!("repository: {e}"));
            }
        }
        if self.services.gateway.is_available() {
            if let Err(e) = self.services.gateway.cleanup_partial_flow_registration(flow_id).await {
                cleanup_errors.push(format!("cache_registration: {e}"));
            }
        }
        let report = self.services.invalidate(flow_id, "create_flow").await;
        cleanup_errors.extend(report.errors);

        self.services.audit.record(AuditEntry::failure(flow_id,
                                                       "create_flow",
                                                       AuditCategory::FlowLifecycle,
                                                       ctx.actor(),
                                                       &reason)
                                   .with_details(json!({ "cleanup_errors": cleanup_errors })));
        OrchestratorError::FlowCreationFailed { reason,
                                                cleanup_errors }
    }
}
