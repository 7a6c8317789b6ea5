//! Fachada del orquestador.
//!
//! Compone registro, repositorio, cache, locks, auditoría y rendimiento y
//! expone el conjunto público de operaciones. Cada instancia está ligada a
//! un `TenantContext`; `with_context` crea otra vista sobre los mismos
//! servicios.
use std::sync::Arc;

use uuid::Uuid;

use flow_core::{AuditEvent, CacheGateway, Flow, FlowId, FlowQuery, FlowRepository, FlowStatus, FlowTransaction, FlowType,
                FlowTypeRegistry, InMemoryCacheGateway, InMemoryFlowRepository, OrchestratorResult, ResumeContext,
                TenantContext};

use crate::audit::{AuditLogger, AuditSink, InMemoryAuditSink};
use crate::cache::{AppCache, CacheInvalidationCoordinator, SessionCache};
use crate::config::OrchestratorConfig;
use crate::lifecycle::{CreateFlowRequest, CreatedFlow, CreationOperations, DeleteOutcome, ExecutionOperations,
                       LifecycleOperations, PauseOutcome, PhaseExecutionRequest, PhaseExecutionResult,
                       ResumeOutcome, ScheduledExecution};
use crate::lock::PhaseLockManager;
use crate::performance::{PerformanceMonitor, PerformanceSummary};
use crate::services::OrchestratorServices;
use crate::status::{DiscoveredFlow, FlowRepairService, FlowStatusReport, RepairOption, RepairResult, RepairType,
                    SmartDiscoveryService, StatusManager};
use crate::status_sync::{FlowHealthReport, ReconciliationReport, StatusChange, StatusSyncService};

#[derive(Clone)]
pub struct MasterFlowOrchestrator {
    context: TenantContext,
    services: Arc<OrchestratorServices>,
    creation: CreationOperations,
    execution: ExecutionOperations,
    lifecycle: LifecycleOperations,
    status: StatusManager,
    discovery: SmartDiscoveryService,
    repair: FlowRepairService,
}

impl std::fmt::Debug for MasterFlowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterFlowOrchestrator")
         .field("context", &self.context)
         .field("flow_types", &self.services.registry.flow_types())
         .finish()
    }
}

impl MasterFlowOrchestrator {
    pub fn builder(registry: FlowTypeRegistry, context: TenantContext) -> OrchestratorBuilder {
        OrchestratorBuilder { registry,
                              context,
                              repository: None,
                              gateway: None,
                              audit_sink: None,
                              app_caches: Vec::new(),
                              config: OrchestratorConfig::default() }
    }

    /// Misma instancia de servicios, otro tenant/actor.
    pub fn with_context(&self, context: TenantContext) -> Self {
        Self { context,
               ..self.clone() }
    }

    pub fn context(&self) -> &TenantContext {
        &self.context
    }

    pub fn registry(&self) -> &FlowTypeRegistry {
        &self.services.registry
    }

    pub fn phase_locks(&self) -> &Arc<PhaseLockManager> {
        &self.services.locks
    }

    pub async fn create_flow(&self, request: CreateFlowRequest) -> OrchestratorResult<CreatedFlow> {
        self.creation.create_flow(&self.context, request).await
    }

    /// Creación dentro de una transacción del llamador (modo atómico).
    pub async fn create_flow_in(&self, tx: &mut FlowTransaction, request: CreateFlowRequest) -> OrchestratorResult<CreatedFlow> {
        self.creation.create_flow_in(tx, &self.context, request).await
    }

    pub async fn execute_phase(&self, flow_id: FlowId, request: PhaseExecutionRequest) -> OrchestratorResult<PhaseExecutionResult> {
        self.execution.execute_phase(&self.context, flow_id, request).await
    }

    /// Devuelve en cuanto la fase queda programada.
    pub fn schedule_phase_execution(&self, flow_id: FlowId, request: PhaseExecutionRequest) -> ScheduledExecution {
        self.execution.schedule_phase_execution(&self.context, flow_id, request)
    }

    pub async fn pause_flow(&self, flow_id: FlowId, reason: Option<String>) -> OrchestratorResult<PauseOutcome> {
        self.lifecycle.pause_flow(&self.context, flow_id, reason).await
    }

    pub async fn resume_flow(&self, flow_id: FlowId, resume: Option<ResumeContext>) -> OrchestratorResult<ResumeOutcome> {
        self.lifecycle.resume_flow(&self.context, flow_id, resume.unwrap_or_default()).await
    }

    pub async fn delete_flow(&self, flow_id: FlowId, reason: Option<String>) -> OrchestratorResult<DeleteOutcome> {
        self.lifecycle.delete_flow(&self.context, flow_id, reason).await
    }

    pub async fn get_flow_status(&self, flow_id: FlowId, include_details: bool) -> OrchestratorResult<FlowStatusReport> {
        self.status.get_flow_status(&self.context, flow_id, include_details).await
    }

    /// Flujos no terminales del engagement actual, más recientes primero.
    pub async fn get_active_flows(&self, flow_type: Option<FlowType>, limit: Option<usize>) -> OrchestratorResult<Vec<Flow>> {
        let limit = limit.unwrap_or(self.services.config.default_list_limit);
        let query = FlowQuery::active(&self.context.scope(), limit).of_type(flow_type);
        Ok(self.services.repository.list_flows(&query).await?)
    }

    /// Flujos (no borrados) de otro engagement del mismo cliente.
    pub async fn list_flows_by_engagement(&self,
                                          engagement_id: Uuid,
                                          flow_type: Option<FlowType>,
                                          limit: Option<usize>)
                                          -> OrchestratorResult<Vec<Flow>> {
        let limit = limit.unwrap_or(self.services.config.default_list_limit);
        let mut query = FlowQuery::for_scope(&self.context.scope(), limit).of_type(flow_type);
        query.engagement_id = Some(engagement_id);
        Ok(self.services.repository.list_flows(&query).await?)
    }

    /// Huérfanos relacionados con `flow_id`, para alimentar
    /// `generate_repair_options`.
    pub async fn discover_orphaned_data(&self, flow_id: FlowId) -> OrchestratorResult<Vec<DiscoveredFlow>> {
        self.discovery.find_related_orphans(&self.context.scope(), flow_id).await
    }

    pub async fn generate_repair_options(&self,
                                         flow_id: FlowId,
                                         discovered: &[DiscoveredFlow])
                                         -> OrchestratorResult<Vec<RepairOption>> {
        self.repair.generate_repair_options(&self.context, flow_id, discovered).await
    }

    pub async fn repair_orphaned_data(&self,
                                      flow_id: FlowId,
                                      repair_type: RepairType,
                                      target_items: &[FlowId],
                                      create_master_flow: bool)
                                      -> OrchestratorResult<RepairResult> {
        self.repair
            .repair_orphaned_data(&self.context, flow_id, repair_type, target_items, create_master_flow)
            .await
    }

    /// Cambio de estado administrativo (p. ej. cancelación) por la ruta de
    /// sincronización master/child.
    pub async fn update_master_flow_status(&self,
                                           flow_id: FlowId,
                                           new_status: FlowStatus,
                                           reason: Option<String>)
                                           -> OrchestratorResult<Flow> {
        let mut change = StatusChange::by(self.context.actor());
        if let Some(reason) = reason {
            change = change.because(reason);
        }
        let flow = self.services
                       .status_sync
                       .update_master_flow_status(&self.context.scope(), flow_id, new_status, change)
                       .await?;
        self.services.invalidate(flow_id, "update_master_flow_status").await;
        Ok(flow)
    }

    pub async fn reconcile_flow_status(&self) -> OrchestratorResult<ReconciliationReport> {
        self.services
            .status_sync
            .reconcile_flow_status(&self.context.scope(), self.context.actor())
            .await
    }

    pub async fn monitor_flow_health(&self) -> OrchestratorResult<FlowHealthReport> {
        self.services
            .status_sync
            .monitor_flow_health(&self.context.scope(), self.services.config.stuck_flow_threshold)
            .await
    }

    pub fn get_flow_audit_trail(&self, flow_id: FlowId) -> Vec<AuditEvent> {
        self.services.audit.trail(flow_id)
    }

    pub fn get_performance_summary(&self) -> PerformanceSummary {
        self.services.performance.summary()
    }
}

/// Ensambla los servicios. Lo no provisto usa los backends en memoria.
pub struct OrchestratorBuilder {
    registry: FlowTypeRegistry,
    context: TenantContext,
    repository: Option<Arc<dyn FlowRepository>>,
    gateway: Option<Arc<dyn CacheGateway>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    app_caches: Vec<Arc<dyn AppCache>>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn repository(mut self, repository: Arc<dyn FlowRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn cache_gateway(mut self, gateway: Arc<dyn CacheGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn app_cache(mut self, cache: Arc<dyn AppCache>) -> Self {
        self.app_caches.push(cache);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> MasterFlowOrchestrator {
        let repository = self.repository
                             .unwrap_or_else(|| Arc::new(InMemoryFlowRepository::new()) as Arc<dyn FlowRepository>);
        let gateway = self.gateway
                          .unwrap_or_else(|| Arc::new(InMemoryCacheGateway::new()) as Arc<dyn CacheGateway>);
        let audit = AuditLogger::new(self.audit_sink
                                         .unwrap_or_else(|| Arc::new(InMemoryAuditSink::new()) as Arc<dyn AuditSink>));
        let registry = Arc::new(self.registry);
        let session = Arc::new(SessionCache::with_capacity(self.config.session_cache_capacity));
        let status_sync = StatusSyncService::new(repository.clone(), registry.clone(), gateway.clone(), audit.clone());
        let invalidation = CacheInvalidationCoordinator::new(gateway.clone(), session.clone(), self.app_caches);

        let services = Arc::new(OrchestratorServices { repository: repository.clone(),
                                                       registry,
                                                       gateway,
                                                       invalidation,
                                                       session,
                                                       locks: Arc::new(PhaseLockManager::new()),
                                                       audit,
                                                       performance: PerformanceMonitor::new(),
                                                       status_sync,
                                                       config: self.config });
        let discovery = SmartDiscoveryService::new(repository);
        let execution = ExecutionOperations::new(services.clone());
        MasterFlowOrchestrator { context: self.context,
                                 creation: CreationOperations::new(services.clone()),
                                 lifecycle: LifecycleOperations::new(services.clone(), execution.clone(), discovery.clone()),
                                 execution,
                                 status: StatusManager::new(services.clone(), discovery.clone()),
                                 repair: FlowRepairService::new(services.clone(), discovery.clone()),
                                 discovery,
                                 services }
    }
}
