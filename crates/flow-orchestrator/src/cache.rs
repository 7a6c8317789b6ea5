//! Invalidación en tres capas: cache distribuida, cache de sesión en
//! proceso y caches de aplicación.
//!
//! Cada paso se intenta siempre y sus errores se acumulan en el reporte;
//! ningún fallo de cache se propaga como error de la operación.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, warn};
use serde::Serialize;

use flow_core::{CacheError, CacheGateway, Flow, FlowId, FlowStatus, TenantScope};

/// Cache en proceso de registros master leídos.
///
/// Cada invalidación sella el flujo con un valor del reloj interno; una
/// lectura sólo se publica si ningún sello posterior a su inicio la cubre, de
/// modo que una lectura lenta nunca pisa una invalidación. Los sellos que se
/// descartan (flujos borrados o poda por capacidad) suben el suelo común, que
/// rechaza toda lectura iniciada antes.
#[derive(Debug)]
pub struct SessionCache {
    entries: DashMap<FlowId, Flow>,
    stamps: DashMap<FlowId, u64>,
    clock: AtomicU64,
    floor: AtomicU64,
    capacity: usize,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

const DEFAULT_CAPACITY: usize = 1024;

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: DashMap::new(),
               stamps: DashMap::new(),
               clock: AtomicU64::new(0),
               floor: AtomicU64::new(0),
               capacity: capacity.max(1) }
    }

    /// Marca de inicio de una lectura, para `put_if_current`.
    pub fn read_token(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    pub fn get(&self, scope: &TenantScope, flow_id: FlowId) -> Option<Flow> {
        self.entries.get(&flow_id).filter(|f| f.belongs_to(scope)).map(|f| f.value().clone())
    }

    /// Publica `flow` si nadie invalidó desde `token`. Los flujos borrados no
    /// se retienen.
    pub fn put_if_current(&self, flow: Flow, token: u64) -> bool {
        if flow.flow_status == FlowStatus::Deleted {
            return false;
        }
        {
            let floor = self.floor.load(Ordering::SeqCst);
            let stamp = self.stamps.entry(flow.flow_id).or_insert(floor);
            if (*stamp).max(floor) > token {
                return false;
            }
            if !self.entries.contains_key(&flow.flow_id) && self.entries.len() >= self.capacity {
                self.evict_one();
            }
            self.entries.insert(flow.flow_id, flow);
        }
        self.prune_stamps();
        true
    }

    pub fn invalidate(&self, flow_id: FlowId) {
        {
            let mut stamp = self.stamps.entry(flow_id).or_insert(0);
            *stamp = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
            self.entries.remove(&flow_id);
        }
        self.prune_stamps();
    }

    /// Invalida y descarta todo rastro del flujo; para flujos borrados.
    pub fn forget(&self, flow_id: FlowId) {
        let stamp = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.floor.fetch_max(stamp, Ordering::SeqCst);
        self.stamps.remove(&flow_id);
        self.entries.remove(&flow_id);
    }

    pub fn contains(&self, flow_id: FlowId) -> bool {
        self.entries.contains_key(&flow_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sellos retenidos; nunca supera el doble de la capacidad.
    pub fn tracked(&self) -> usize {
        self.stamps.len()
    }

    fn evict_one(&self) {
        let victim = self.entries.iter().next().map(|e| *e.key());
        if let Some(victim) = victim {
            self.entries.remove(&victim);
        }
    }

    fn prune_stamps(&self) {
        if self.stamps.len() <= self.capacity * 2 {
            return;
        }
        // Subir el suelo antes de soltar sellos: lo descartado queda cubierto.
        let floor = self.clock.load(Ordering::SeqCst);
        self.floor.fetch_max(floor, Ordering::SeqCst);
        self.stamps.retain(|_, stamp| *stamp > floor);
        debug!("session_cache:pruned floor={floor} kept={}", self.stamps.len());
    }
}

/// Cache de nivel aplicación registrada por el integrador.
#[async_trait]
pub trait AppCache: Send + Sync {
    fn name(&self) -> &str;
    async fn invalidate(&self, flow_id: FlowId, operation: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvalidationReport {
    pub distributed_cache: bool,
    pub in_process_cache: bool,
    pub app_cache: bool,
    pub errors: Vec<String>,
}

impl InvalidationReport {
    pub fn is_complete(&self) -> bool {
        self.distributed_cache && self.in_process_cache && self.app_cache
    }
}

pub struct CacheInvalidationCoordinator {
    gateway: Arc<dyn CacheGateway>,
    session: Arc<SessionCache>,
    app_caches: Vec<Arc<dyn AppCache>>,
}

impl std::fmt::Debug for CacheInvalidationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInvalidationCoordinator")
         .field("app_caches", &self.app_caches.iter().map(|c| c.name().to_string()).collect::<Vec<_>>())
         .finish()
    }
}

impl CacheInvalidationCoordinator {
    pub fn new(gateway: Arc<dyn CacheGateway>, session: Arc<SessionCache>, app_caches: Vec<Arc<dyn AppCache>>) -> Self {
        Self { gateway,
               session,
               app_caches }
    }

    pub fn session(&self) -> &Arc<SessionCache> {
        &self.session
    }

    pub async fn invalidate(&self, flow_id: FlowId, operation: &str) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        if self.gateway.is_available() {
            match self.gateway.invalidate_flow_cache(flow_id).await {
                Ok(()) => report.distributed_cache = true,
                Err(e) => report.errors.push(format!("distributed_cache: {e}")),
            }
        } else {
            report.errors.push(format!("distributed_cache: {}", CacheError::Unavailable));
        }

        self.session.invalidate(flow_id);
        report.in_process_cache = true;

        let mut app_ok = true;
        for cache in &self.app_caches {
            if let Err(e) = cache.invalidate(flow_id, operation).await {
                app_ok = false;
                report.errors.push(format!("app_cache[{}]: {e}", cache.name()));
            }
        }
        report.app_cache = app_ok;

        if report.errors.is_empty() {
            debug!("invalidate:done flow_id={flow_id} op={operation}");
        } else {
            warn!("invalidate:partial flow_id={flow_id} op={operation} errors={:?}", report.errors);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::InMemoryCacheGateway;

    struct BrokenAppCache;

    #[async_trait]
    impl AppCache for BrokenAppCache {
        fn name(&self) -> &str {
            "dashboard"
        }

        async fn invalidate(&self, _flow_id: FlowId, _operation: &str) -> Result<(), CacheError> {
            Err(CacheError::Operation("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn failing_layers_do_not_stop_the_others() {
        let coordinator = CacheInvalidationCoordinator::new(Arc::new(InMemoryCacheGateway::unavailable()),
                                                            Arc::new(SessionCache::new()),
                                                            vec![Arc::new(BrokenAppCache)]);
        let report = coordinator.invalidate(FlowId::new(), "delete_flow").await;
        assert!(!report.distributed_cache);
        assert!(report.in_process_cache);
        assert!(!report.app_cache);
        assert_eq!(report.errors.len(), 2);
        assert!(!report.is_complete());
    }

    fn scoped_flow(scope: TenantScope) -> Flow {
        Flow::new(FlowId::new(), flow_core::FlowType::Assessment, "a", scope, "t", "initialization")
    }

    fn scope() -> TenantScope {
        TenantScope::new(uuid::Uuid::new_v4(), uuid::Uuid::new_v4())
    }

    #[test]
    fn stale_read_is_not_published_after_invalidation() {
        let session = SessionCache::new();
        let scope = scope();
        let flow = scoped_flow(scope);
        let token = session.read_token();
        session.invalidate(flow.flow_id);
        assert!(!session.put_if_current(flow.clone(), token));
        assert!(session.put_if_current(flow.clone(), session.read_token()));
        assert!(session.get(&scope, flow.flow_id).is_some());
    }

    #[test]
    fn deleted_flows_leave_no_trace() {
        let session = SessionCache::new();
        let mut flow = scoped_flow(scope());
        let stale = session.read_token();
        assert!(session.put_if_current(flow.clone(), session.read_token()));
        session.invalidate(flow.flow_id);
        session.forget(flow.flow_id);
        assert!(!session.contains(flow.flow_id));
        assert_eq!(session.tracked(), 0);

        // Una lectura anterior al borrado sigue sin poder publicarse.
        assert!(!session.put_if_current(flow.clone(), stale));
        flow.flow_status = FlowStatus::Deleted;
        assert!(!session.put_if_current(flow.clone(), session.read_token()));
        assert!(session.is_empty());
    }

    #[test]
    fn capacity_bounds_entries_and_stamps() {
        let session = SessionCache::with_capacity(4);
        let scope = scope();
        for _ in 0..50 {
            let flow = scoped_flow(scope);
            assert!(session.put_if_current(flow.clone(), session.read_token()));
            session.invalidate(flow.flow_id);
            assert!(session.put_if_current(flow, session.read_token()));
            assert!(session.len() <= 4);
            assert!(session.tracked() <= 8);
        }
        assert_eq!(session.len(), 4);
    }

    #[test]
    fn pruning_rejects_reads_that_started_before_it() {
        let session = SessionCache::with_capacity(1);
        let scope = scope();
        let slow = scoped_flow(scope);
        let token = session.read_token();
        session.invalidate(slow.flow_id);
        for _ in 0..3 {
            session.invalidate(FlowId::new());
        }
        assert!(session.tracked() <= 2);
        assert!(!session.put_if_current(slow, token));
    }
}
