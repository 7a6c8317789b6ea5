use masterflow::config::AppConfig;
use masterflow::runtime::{in_memory_orchestrator, tenant_context};
use uuid::Uuid;

use flow_core::FlowStatus;
use flow_orchestrator::{CreateFlowRequest, PhaseExecutionRequest, PhaseExecutionStatus};

fn config() -> AppConfig {
    AppConfig::from_lookup(|key| match key {
        "MASTERFLOW_ACTOR" => Some("smoke@example.com".to_string()),
        "MASTERFLOW_BACKGROUND_EXECUTION" => Some("false".to_string()),
        _ => None,
    })
}

#[tokio::test]
async fn wired_orchestrator_runs_a_discovery_flow() {
    let cfg = config();
    let mfo = in_memory_orchestrator(&cfg, tenant_context(&cfg, Uuid::new_v4(), Uuid::new_v4())).unwrap();

    let created = mfo.create_flow(CreateFlowRequest::new("discovery")).await.unwrap();
    assert_eq!(created.flow.flow_name, "Discovery flow");
    assert_eq!(created.flow.created_by, "smoke@example.com");

    let result = mfo.execute_phase(created.flow_id, PhaseExecutionRequest::new("data_import"))
                    .await
                    .unwrap();
    assert_eq!(result.status, PhaseExecutionStatus::Completed);

    let active = mfo.get_active_flows(None, None).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].flow_status, FlowStatus::Running);
}

#[tokio::test]
async fn every_standard_type_can_be_created() {
    let cfg = config();
    let mfo = in_memory_orchestrator(&cfg, tenant_context(&cfg, Uuid::new_v4(), Uuid::new_v4())).unwrap();
    for flow_type in ["discovery", "assessment", "planning", "execution", "modernize", "decommission"] {
        let created = mfo.create_flow(CreateFlowRequest::new(flow_type)).await.unwrap();
        assert_eq!(created.flow.flow_type.as_str(), flow_type);
    }
    assert_eq!(mfo.get_active_flows(None, Some(10)).await.unwrap().len(), 6);
}
