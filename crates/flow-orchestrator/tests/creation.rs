mod common;

use std::sync::Arc;

use serde_json::json;

use common::{fast_config, harness, harness_with, tenant, FailingRepository};
use flow_core::{AuditCategory, FlowRepository, FlowStatus, FlowTransaction, FlowType, FlowTypeConfig, FlowTypeRegistry,
                FnHandlerFactory, HandlerError, InMemoryCacheGateway, InMemoryFlowRepository, OrchestratorError,
                PhaseDefinition, PhaseHandler};
use flow_orchestrator::{CreateFlowRequest, MasterFlowOrchestrator, PhaseExecutionRequest};

#[tokio::test]
async fn creation_persists_master_and_mirrored_child() {
    let h = harness();
    let mfo = &h.orchestrator;
    let mut configuration = serde_json::Map::new();
    configuration.insert("source".into(), json!("cmdb"));
    let created = mfo.create_flow(CreateFlowRequest::new("Discovery").with_configuration(configuration)
                                                                     .with_initial_state(json!({ "seed": 1 })))
                     .await
                     .unwrap();

    let scope = mfo.context().scope();
    let master = h.repository.get_by_flow_id(&scope, created.flow_id).await.unwrap().unwrap();
    assert_eq!(master.flow_type, FlowType::Discovery);
    assert_eq!(master.flow_name, "Discovery flow");
    assert_eq!(master.created_by, "operator@example.com");
    assert_eq!(master.configuration["source"], "cmdb");
    assert_eq!(master.persistence_data.handler_payload["seed"], 1);
    assert!(master.persistence_data.is_phase_completed("initialization"));

    let child = h.repository.get_child(&scope, created.flow_id).await.unwrap().unwrap();
    assert_eq!(child.master_flow_id, Some(created.flow_id));
    assert_eq!(child.parsed_status(), Some(FlowStatus::Running));
    assert_eq!(child.current_phase.as_deref(), Some("initialization"));
}

#[tokio::test]
async fn unavailable_cache_does_not_block_creation() {
    let h = harness_with(flow_adapters::standard_registry().unwrap(),
                         InMemoryCacheGateway::unavailable(),
                         fast_config());
    let mfo = &h.orchestrator;
    let created = mfo.create_flow(CreateFlowRequest::new("assessment")).await.unwrap();
    assert!(!created.cache_registered);
    assert_eq!(h.repository.master_count().await, 1);

    let result = mfo.execute_phase(created.flow_id, PhaseExecutionRequest::new("readiness_check"))
                    .await
                    .unwrap();
    assert_eq!(result.flow_status, Some(FlowStatus::Running));

    let deleted = mfo.delete_flow(created.flow_id, None).await.unwrap();
    assert!(!deleted.invalidation.distributed_cache);
    assert!(deleted.invalidation.in_process_cache);
    assert!(!deleted.invalidation.is_complete());
}

#[tokio::test]
async fn cache_registration_is_retried_once() {
    let cache = InMemoryCacheGateway::new();
    cache.fail_next_registrations(1);
    let h = harness_with(flow_adapters::standard_registry().unwrap(), cache, fast_config());
    let created = h.orchestrator.create_flow(CreateFlowRequest::new("planning")).await.unwrap();
    assert!(created.cache_registered);
    assert!(h.cache.contains(created.flow_id));
}

#[tokio::test]
async fn abandoned_registration_leaves_a_usable_flow() {
    let cache = InMemoryCacheGateway::new();
    cache.fail_next_registrations(2);
    let h = harness_with(flow_adapters::standard_registry().unwrap(), cache, fast_config());
    let mfo = &h.orchestrator;
    let created = mfo.create_flow(CreateFlowRequest::new("planning")).await.unwrap();
    assert!(!created.cache_registered);
    assert!(!h.cache.contains(created.flow_id));

    let status = mfo.get_flow_status(created.flow_id, false).await.unwrap();
    assert_eq!(status.flow_status, FlowStatus::Running);
}

#[tokio::test]
async fn failed_commit_compensates_everything() {
    let inner = Arc::new(InMemoryFlowRepository::new());
    let failing = FailingRepository::new(inner.clone());
    failing.fail(true);
    let cache = Arc::new(InMemoryCacheGateway::new());
    let mfo = MasterFlowOrchestrator::builder(flow_adapters::standard_registry().unwrap(), tenant())
        .repository(failing.clone())
        .cache_gateway(cache.clone())
        .config(fast_config())
        .build();

    let err = mfo.create_flow(CreateFlowRequest::new("assessment")).await.unwrap_err();
    let OrchestratorError::FlowCreationFailed { reason, cleanup_errors } = err else {
        panic!("expected creation failure");
    };
    assert!(reason.contains("disk full"));
    assert!(cleanup_errors.iter().any(|e| e.starts_with("repository:")));
    assert!(cache.is_empty());
    assert_eq!(inner.master_count().await, 0);
    assert_eq!(inner.child_count().await, 0);
}

fn unavailable_handler() -> Result<Arc<dyn PhaseHandler>, HandlerError> {
    Err(HandlerError::Unavailable("assessment engine not configured".into()))
}

#[tokio::test]
async fn unbuildable_handler_falls_back_to_noop_initialization() {
    let config = FlowTypeConfig::new(FlowType::Assessment,
                                     Arc::new(FnHandlerFactory::new("deferred", unavailable_handler)))
                 .phase(PhaseDefinition::new("initialization"))
                 .phase(PhaseDefinition::new("readiness_check").depends_on(&["initialization"]));
    let registry = FlowTypeRegistry::builder().register(config).unwrap().build();
    let h = harness_with(registry, InMemoryCacheGateway::new(), fast_config());
    let mfo = &h.orchestrator;

    let created = mfo.create_flow(CreateFlowRequest::new("assessment")).await.unwrap();
    assert!(created.initialization.fallback);
    assert_eq!(h.repository.child_count().await, 0);
    let trail = mfo.get_flow_audit_trail(created.flow_id);
    assert_eq!(trail[0].details["initialization_fallback"], true);

    let err = mfo.execute_phase(created.flow_id, PhaseExecutionRequest::new("readiness_check"))
                 .await
                 .unwrap_err();
    assert!(matches!(err, OrchestratorError::Handler(HandlerError::Unavailable(_))));
}

#[tokio::test]
async fn caller_transaction_commits_master_and_child_together() {
    let h = harness();
    let mfo = &h.orchestrator;
    let mut tx = FlowTransaction::new();
    let created = mfo.create_flow_in(&mut tx, CreateFlowRequest::new("execution")).await.unwrap();
    assert_eq!(h.repository.master_count().await, 0);
    assert_eq!(tx.len(), 2);

    h.repository.commit(tx).await.unwrap();
    assert_eq!(h.repository.master_count().await, 1);
    assert_eq!(h.repository.child_count().await, 1);

    let trail = mfo.get_flow_audit_trail(created.flow_id);
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].category, AuditCategory::FlowLifecycle);
    assert_eq!(trail[0].details["atomic"], true);
}
