#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use flow_core::{ChildFlowRecord, Flow, FlowId, FlowQuery, FlowRepository, FlowTransaction, FlowType, FlowTypeConfig,
                FlowTypeRegistry, HandlerError, InMemoryCacheGateway, InMemoryFlowRepository, PhaseDefinition,
                PhaseHandler, PhaseInitialization, PhaseOutcome, RepositoryError, SharedHandlerFactory,
                TenantContext, TenantScope};
use flow_orchestrator::{MasterFlowOrchestrator, OrchestratorConfig};

pub fn tenant() -> TenantContext {
    TenantContext::new(Uuid::new_v4(), Uuid::new_v4()).with_user("operator@example.com")
}

pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig { cache_retry_delay: Duration::from_millis(1),
                         ..OrchestratorConfig::default() }
}

/// Orquestador con el catálogo estándar y backends en memoria compartidos.
pub struct Harness {
    pub orchestrator: MasterFlowOrchestrator,
    pub repository: Arc<InMemoryFlowRepository>,
    pub cache: Arc<InMemoryCacheGateway>,
}

pub fn harness_with(registry: FlowTypeRegistry, cache: InMemoryCacheGateway, config: OrchestratorConfig) -> Harness {
    let repository = Arc::new(InMemoryFlowRepository::new());
    let cache = Arc::new(cache);
    let orchestrator = MasterFlowOrchestrator::builder(registry, tenant()).repository(repository.clone())
                                                                          .cache_gateway(cache.clone())
                                                                          .config(config)
                                                                          .build();
    Harness { orchestrator,
              repository,
              cache }
}

pub fn harness() -> Harness {
    harness_with(flow_adapters::standard_registry().expect("catalog"),
                 InMemoryCacheGateway::new(),
                 fast_config())
}

/// Child huérfano insertado directamente en la tabla child.
pub async fn insert_orphan(repository: &InMemoryFlowRepository,
                           scope: TenantScope,
                           flow_id: FlowId,
                           flow_type: FlowType,
                           status: Option<&str>)
                           -> ChildFlowRecord {
    let mut child = ChildFlowRecord::new(flow_id, flow_type, scope, json!({ "recovered": true }));
    child.master_flow_id = None;
    child.status = status.map(str::to_string);
    child.current_phase = Some("initialization".into());
    child.progress_percentage = 20.0;
    let mut tx = FlowTransaction::new();
    tx.insert_child(child.clone());
    repository.commit(tx).await.expect("seed orphan");
    child
}

/// Handler que cuenta invocaciones y tarda `delay` en cada fase.
pub struct CountingHandler {
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl CountingHandler {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0),
                        delay })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhaseHandler for CountingHandler {
    async fn initialize(&self, _flow: &Flow) -> Result<PhaseInitialization, HandlerError> {
        Ok(PhaseInitialization { child_data: Some(json!({})),
                                 ..PhaseInitialization::default() })
    }

    async fn execute_phase(&self, _flow: &Flow, phase: &str, _input: &Value) -> Result<PhaseOutcome, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(PhaseOutcome::with_summary(json!({ "phase": phase })))
    }
}

/// Registro con un único tipo (`assessment`) servido por `handler`.
pub fn registry_with(handler: Arc<dyn PhaseHandler>) -> FlowTypeRegistry {
    let config = FlowTypeConfig::new(FlowType::Assessment,
                                     Arc::new(SharedHandlerFactory::new("counting", handler)))
                 .phase(PhaseDefinition::new("initialization"))
                 .phase(PhaseDefinition::new("readiness_check").depends_on(&["initialization"]))
                 .phase(PhaseDefinition::new("risk_assessment").depends_on(&["readiness_check"]))
                 .mirrors_child_status(true);
    FlowTypeRegistry::builder().register(config).expect("valid registry").build()
}

/// Registro `initialization -> {a, b} -> c` servido por `handler`.
pub fn fork_registry_with(handler: Arc<dyn PhaseHandler>) -> FlowTypeRegistry {
    let config = FlowTypeConfig::new(FlowType::Assessment,
                                     Arc::new(SharedHandlerFactory::new("counting", handler)))
                 .phase(PhaseDefinition::new("initialization"))
                 .phase(PhaseDefinition::new("a").depends_on(&["initialization"]))
                 .phase(PhaseDefinition::new("b").depends_on(&["initialization"]))
                 .phase(PhaseDefinition::new("c").depends_on(&["a", "b"]))
                 .mirrors_child_status(true);
    FlowTypeRegistry::builder().register(config).expect("valid registry").build()
}

/// Repositorio cuyo `commit` puede forzarse a fallar.
pub struct FailingRepository {
    pub inner: Arc<InMemoryFlowRepository>,
    pub fail_commits: AtomicBool,
}

impl FailingRepository {
    pub fn new(inner: Arc<InMemoryFlowRepository>) -> Arc<Self> {
        Arc::new(Self { inner,
                        fail_commits: AtomicBool::new(false) })
    }

    pub fn fail(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FlowRepository for FailingRepository {
    async fn get_by_flow_id(&self, scope: &TenantScope, flow_id: FlowId) -> Result<Option<Flow>, RepositoryError> {
        self.inner.get_by_flow_id(scope, flow_id).await
    }

    async fn list_flows(&self, query: &FlowQuery) -> Result<Vec<Flow>, RepositoryError> {
        self.inner.list_flows(query).await
    }

    async fn get_child(&self, scope: &TenantScope, flow_id: FlowId) -> Result<Option<ChildFlowRecord>, RepositoryError> {
        self.inner.get_child(scope, flow_id).await
    }

    async fn find_related_children(&self,
                                   scope: &TenantScope,
                                   flow_id: FlowId)
                                   -> Result<Vec<ChildFlowRecord>, RepositoryError> {
        self.inner.find_related_children(scope, flow_id).await
    }

    async fn list_children(&self, scope: &TenantScope) -> Result<Vec<ChildFlowRecord>, RepositoryError> {
        self.inner.list_children(scope).await
    }

    async fn commit(&self, tx: FlowTransaction) -> Result<(), RepositoryError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(RepositoryError::Internal("disk full".into()));
        }
        self.inner.commit(tx).await
    }
}
