//! Consulta de estado, huérfanos, reparación y sincronización master/child.

mod common;

use std::time::Duration;

use common::{fast_config, harness, harness_with, insert_orphan, tenant};
use flow_core::{AuditCategory, FlowId, FlowRepository, FlowStatus, FlowTransaction, FlowType, InMemoryCacheGateway,
                OrchestratorError};
use flow_orchestrator::{CreateFlowRequest, OrphanReason, PhaseExecutionRequest, RepairType, ResumeOutcome,
                        StatusSource};

#[tokio::test]
async fn status_falls_back_to_orphaned_child() {
    let h = harness();
    let mfo = &h.orchestrator;
    let id = FlowId::new();
    insert_orphan(&h.repository, mfo.context().scope(), id, FlowType::Assessment, Some("processing")).await;

    let report = mfo.get_flow_status(id, false).await.unwrap();
    assert_eq!(report.source, StatusSource::SmartDiscovery);
    assert_eq!(report.flow_status, FlowStatus::Running);
    assert_eq!(report.flow_type, FlowType::Assessment);
    assert_eq!(report.progress_percentage, 20.0);
    assert!(report.flow_name.is_none());
    assert!(report.metadata.repair_available);
    assert_eq!(report.metadata.orphan_summary.unwrap().count, 1);
}

#[tokio::test]
async fn unreadable_child_status_reports_initializing() {
    let h = harness();
    let mfo = &h.orchestrator;
    let id = FlowId::new();
    insert_orphan(&h.repository, mfo.context().scope(), id, FlowType::Planning, Some("exploded")).await;
    assert_eq!(mfo.get_flow_status(id, false).await.unwrap().flow_status, FlowStatus::Initializing);
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let h = harness();
    let id = FlowId::new();
    assert_eq!(h.orchestrator.get_flow_status(id, true).await.unwrap_err(), OrchestratorError::FlowNotFound(id));
}

#[tokio::test]
async fn orphans_of_other_tenants_stay_hidden() {
    let h = harness();
    let id = FlowId::new();
    insert_orphan(&h.repository, tenant().scope(), id, FlowType::Discovery, None).await;
    assert!(matches!(h.orchestrator.get_flow_status(id, false).await, Err(OrchestratorError::FlowNotFound(_))));
    assert!(h.orchestrator.discover_orphaned_data(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn details_flag_orphans_sharing_the_master_id() {
    let h = harness();
    let mfo = &h.orchestrator;
    let id = mfo.create_flow(CreateFlowRequest::new("decommission")).await.unwrap().flow_id;
    assert_eq!(h.repository.child_count().await, 0);
    insert_orphan(&h.repository, mfo.context().scope(), id, FlowType::Decommission, None).await;

    let plain = mfo.get_flow_status(id, false).await.unwrap();
    assert_eq!(plain.source, StatusSource::MasterRecord);
    assert!(!plain.metadata.repair_available);

    let detailed = mfo.get_flow_status(id, true).await.unwrap();
    assert!(detailed.metadata.repair_available);
    let summary = detailed.metadata.orphan_summary.unwrap();
    assert_eq!(summary.child_flow_ids, vec![id]);
    assert_eq!(summary.flow_types, vec![FlowType::Decommission]);
}

#[tokio::test]
async fn resume_guides_towards_repair_for_orphans() {
    let h = harness();
    let mfo = &h.orchestrator;
    let id = FlowId::new();
    insert_orphan(&h.repository, mfo.context().scope(), id, FlowType::Discovery, Some("paused")).await;

    let ResumeOutcome::Guidance { flow_type, repair_operation, message, .. } = mfo.resume_flow(id, None).await.unwrap()
    else {
        panic!("expected guidance");
    };
    assert_eq!(flow_type, FlowType::Discovery);
    assert_eq!(repair_operation, "repair_orphaned_data");
    assert!(message.contains("no master link"));

    let missing = FlowId::new();
    assert_eq!(mfo.resume_flow(missing, None).await.unwrap_err(), OrchestratorError::FlowNotFound(missing));
}

#[tokio::test]
async fn create_master_repair_restores_a_resumable_flow() {
    let h = harness();
    let mfo = &h.orchestrator;
    let id = FlowId::new();
    insert_orphan(&h.repository, mfo.context().scope(), id, FlowType::Assessment, None).await;

    let discovered = mfo.discover_orphaned_data(id).await.unwrap();
    assert_eq!(discovered.len(), 1);
    assert_eq!(discovered[0].reason, OrphanReason::Unlinked);

    let options = mfo.generate_repair_options(id, &discovered).await.unwrap();
    let kinds: Vec<RepairType> = options.iter().map(|o| o.repair_type).collect();
    assert_eq!(kinds, vec![RepairType::CreateMasterFlow, RepairType::MarkForDeletion]);
    assert!(options[0].creates_master);
    assert_eq!(options[0].target_items, vec![id]);

    let result = mfo.repair_orphaned_data(id, RepairType::CreateMasterFlow, &options[0].target_items, true)
                    .await
                    .unwrap();
    assert_eq!(result.created_master, Some(id));
    assert_eq!(result.repaired_items, vec![id]);

    let report = mfo.get_flow_status(id, false).await.unwrap();
    assert_eq!(report.source, StatusSource::MasterRecord);
    assert_eq!(report.flow_status, FlowStatus::Paused);
    assert_eq!(report.progress_percentage, 20.0);
    assert!(report.completed_phases.contains(&"initialization".to_string()));

    let scope = mfo.context().scope();
    let master = h.repository.get_by_flow_id(&scope, id).await.unwrap().unwrap();
    assert!(master.flow_metadata.repaired_from_orphan);
    let transitions = &master.flow_metadata.status_transitions;
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].from, FlowStatus::Initializing);
    assert_eq!(transitions[0].to, FlowStatus::Paused);
    assert_eq!(transitions[0].actor, "operator@example.com");
    let child = h.repository.get_child(&scope, id).await.unwrap().unwrap();
    assert_eq!(child.master_flow_id, Some(id));
    assert_eq!(child.parsed_status(), Some(FlowStatus::Paused));

    assert!(matches!(mfo.resume_flow(id, None).await.unwrap(), ResumeOutcome::Resumed { .. }));
    let result = mfo.execute_phase(id, PhaseExecutionRequest::new("readiness_check")).await.unwrap();
    assert_eq!(result.flow_status, Some(FlowStatus::Running));

    let repair_events: Vec<_> = mfo.get_flow_audit_trail(id)
                                   .into_iter()
                                   .filter(|e| e.category == AuditCategory::DataRepair)
                                   .collect();
    assert_eq!(repair_events.len(), 1);
    assert!(repair_events[0].success);
}

#[tokio::test]
async fn orphans_link_to_an_existing_master_of_the_same_type() {
    let h = harness();
    let mfo = &h.orchestrator;
    let scope = mfo.context().scope();
    let master_id = mfo.create_flow(CreateFlowRequest::new("assessment")).await.unwrap().flow_id;
    let stray = FlowId::new();
    insert_orphan(&h.repository, scope, stray, FlowType::Assessment, None).await;
    let foreign = FlowId::new();
    insert_orphan(&h.repository, scope, foreign, FlowType::Planning, None).await;

    let discovered = mfo.discover_orphaned_data(stray).await.unwrap();
    let options = mfo.generate_repair_options(master_id, &discovered).await.unwrap();
    assert_eq!(options[0].repair_type, RepairType::LinkToExistingMaster);

    let err = mfo.repair_orphaned_data(master_id, RepairType::LinkToExistingMaster, &[foreign], false)
                 .await
                 .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    let err = mfo.repair_orphaned_data(master_id, RepairType::CreateMasterFlow, &[stray], true)
                 .await
                 .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    let linked = mfo.repair_orphaned_data(master_id, RepairType::LinkToExistingMaster, &[stray], false)
                    .await
                    .unwrap();
    assert!(linked.created_master.is_none());
    let child = h.repository.get_child(&scope, stray).await.unwrap().unwrap();
    assert_eq!(child.master_flow_id, Some(master_id));
    assert_eq!(child.parsed_status(), Some(FlowStatus::Running));
    assert!(mfo.discover_orphaned_data(stray).await.unwrap().is_empty());
}

#[tokio::test]
async fn repair_rejects_records_that_are_not_orphans() {
    let h = harness();
    let mfo = &h.orchestrator;
    let id = mfo.create_flow(CreateFlowRequest::new("execution")).await.unwrap().flow_id;

    let err = mfo.repair_orphaned_data(id, RepairType::MarkForDeletion, &[id], false).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
    let err = mfo.repair_orphaned_data(id, RepairType::MarkForDeletion, &[], false).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert!(!mfo.get_flow_audit_trail(id).last().unwrap().success);
}

#[tokio::test]
async fn marked_orphans_disappear_from_discovery() {
    let h = harness();
    let mfo = &h.orchestrator;
    let id = FlowId::new();
    insert_orphan(&h.repository, mfo.context().scope(), id, FlowType::Modernize, Some("running")).await;

    mfo.repair_orphaned_data(id, RepairType::MarkForDeletion, &[id], false).await.unwrap();
    let child = h.repository.get_child(&mfo.context().scope(), id).await.unwrap().unwrap();
    assert!(child.marked_for_deletion);
    assert!(matches!(mfo.get_flow_status(id, false).await, Err(OrchestratorError::FlowNotFound(_))));
}

#[tokio::test]
async fn reconciliation_repairs_child_drift_once() {
    let h = harness();
    let mfo = &h.orchestrator;
    let scope = mfo.context().scope();
    let id = mfo.create_flow(CreateFlowRequest::new("assessment")).await.unwrap().flow_id;
    mfo.create_flow(CreateFlowRequest::new("decommission")).await.unwrap();
    insert_orphan(&h.repository, scope, FlowId::new(), FlowType::Discovery, None).await;

    let mut drifted = h.repository.get_child(&scope, id).await.unwrap().unwrap();
    let mut tx = FlowTransaction::new();
    tx.discard_child(id);
    h.repository.commit(tx).await.unwrap();
    drifted.status = Some("paused".into());
    let mut tx = FlowTransaction::new();
    tx.insert_child(drifted);
    h.repository.commit(tx).await.unwrap();

    let report = mfo.reconcile_flow_status().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.orphans.len(), 1);
    assert_eq!(report.corrections.len(), 1);
    assert_eq!(report.corrections[0].child_status.as_deref(), Some("paused"));
    assert_eq!(report.corrections[0].master_status, FlowStatus::Running);

    let child = h.repository.get_child(&scope, id).await.unwrap().unwrap();
    assert_eq!(child.parsed_status(), Some(FlowStatus::Running));
    assert!(mfo.reconcile_flow_status().await.unwrap().corrections.is_empty());
    assert!(mfo.get_flow_audit_trail(id).iter().any(|e| e.operation == "reconcile_flow_status"));
}

#[tokio::test]
async fn health_report_flags_idle_running_flows_and_orphans() {
    let mut config = fast_config();
    config.stuck_flow_threshold = Duration::ZERO;
    let h = harness_with(flow_adapters::standard_registry().unwrap(), InMemoryCacheGateway::new(), config);
    let mfo = &h.orchestrator;
    let running = mfo.create_flow(CreateFlowRequest::new("planning")).await.unwrap().flow_id;
    let paused = mfo.create_flow(CreateFlowRequest::new("planning")).await.unwrap().flow_id;
    mfo.pause_flow(paused, None).await.unwrap();
    insert_orphan(&h.repository, mfo.context().scope(), FlowId::new(), FlowType::Planning, None).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let health = mfo.monitor_flow_health().await.unwrap();
    assert_eq!(health.total_flows, 2);
    assert_eq!(health.stuck.len(), 1);
    assert_eq!(health.stuck[0].flow_id, running);
    assert_eq!(health.orphan_count, 1);
    assert!(health.drifted.is_empty());
    assert!(!health.is_healthy());

    let quiet = harness();
    quiet.orchestrator.create_flow(CreateFlowRequest::new("planning")).await.unwrap();
    assert!(quiet.orchestrator.monitor_flow_health().await.unwrap().is_healthy());
}
