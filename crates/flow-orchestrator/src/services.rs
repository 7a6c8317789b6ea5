//! Colaboradores compartidos por las operaciones del orquestador.
use std::sync::Arc;

use log::warn;

use flow_core::{CacheGateway, Flow, FlowId, FlowRepository, FlowTypeRegistry, OrchestratorError,
                OrchestratorResult, TenantScope};

use crate::audit::AuditLogger;
use crate::cache::{CacheInvalidationCoordinator, InvalidationReport, SessionCache};
use crate::config::OrchestratorConfig;
use crate::lock::PhaseLockManager;
use crate::performance::PerformanceMonitor;
use crate::status_sync::StatusSyncService;

pub struct OrchestratorServices {
    pub repository: Arc<dyn FlowRepository>,
    pub registry: Arc<FlowTypeRegistry>,
    pub gateway: Arc<dyn CacheGateway>,
    pub invalidation: CacheInvalidationCoordinator,
    pub session: Arc<SessionCache>,
    pub locks: Arc<PhaseLockManager>,
    pub audit: AuditLogger,
    pub performance: PerformanceMonitor,
    pub status_sync: StatusSyncService,
    pub config: OrchestratorConfig,
}

impl OrchestratorServices {
    /// Lectura autoritativa desde el repositorio.
    pub async fn load_flow(&self, scope: &TenantScope, flow_id: FlowId) -> OrchestratorResult<Flow> {
        self.repository
            .get_by_flow_id(scope, flow_id)
            .await?
            .ok_or(OrchestratorError::FlowNotFound(flow_id))
    }

    /// Lectura con cache de sesión. Un fallo o ausencia en cache cae siempre
    /// al repositorio.
    pub async fn read_flow(&self, scope: &TenantScope, flow_id: FlowId) -> OrchestratorResult<Option<Flow>> {
        if let Some(flow) = self.session.get(scope, flow_id) {
            return Ok(Some(flow));
        }
        let token = self.session.read_token();
        let flow = self.repository.get_by_flow_id(scope, flow_id).await?;
        if let Some(flow) = &flow {
            self.session.put_if_current(flow.clone(), token);
        }
        Ok(flow)
    }

    /// Invalida las tres capas y deja constancia en el log si alguna falla.
    pub async fn invalidate(&self, flow_id: FlowId, operation: &str) -> InvalidationReport {
        let report = self.invalidation.invalidate(flow_id, operation).await;
        if !report.is_complete() {
            warn!("{operation}:cache_degraded flow_id={flow_id} errors={}", report.errors.len());
        }
        report
    }
}
