mod common;

use std::time::Duration;

use serde_json::json;

use common::{fast_config, fork_registry_with, harness, harness_with, registry_with, CountingHandler};
use flow_core::{FlowRepository, FlowStatus, InMemoryCacheGateway, OrchestratorError, ResumeContext};
use flow_orchestrator::{CreateFlowRequest, PauseOutcome, PhaseExecutionRequest, PhaseExecutionStatus, ResumeExecution,
                        ResumeOutcome, ScheduledExecution};

#[tokio::test]
async fn concurrent_calls_run_the_handler_once() {
    let handler = CountingHandler::new(Duration::from_millis(50));
    let h = harness_with(registry_with(handler.clone()), InMemoryCacheGateway::new(), fast_config());
    let mfo = &h.orchestrator;
    let id = mfo.create_flow(CreateFlowRequest::new("assessment")).await.unwrap().flow_id;

    let (a, b) = tokio::join!(mfo.execute_phase(id, PhaseExecutionRequest::new("readiness_check")),
                              mfo.execute_phase(id, PhaseExecutionRequest::new("readiness_check")));
    let mut statuses = vec![a.unwrap().status, b.unwrap().status];
    statuses.sort_by_key(|s| format!("{s:?}"));
    assert_eq!(statuses, vec![PhaseExecutionStatus::Completed, PhaseExecutionStatus::DuplicateSkipped]);
    assert_eq!(handler.calls(), 1);
    assert!(!mfo.phase_locks().is_locked(id, "readiness_check"));
    assert_eq!(mfo.phase_locks().held_count(), 0);
}

#[tokio::test]
async fn sibling_phases_of_one_flow_keep_both_completions() {
    let handler = CountingHandler::new(Duration::from_millis(20));
    let h = harness_with(fork_registry_with(handler.clone()), InMemoryCacheGateway::new(), fast_config());
    let mfo = &h.orchestrator;
    let id = mfo.create_flow(CreateFlowRequest::new("assessment")).await.unwrap().flow_id;

    let (a, b) = tokio::join!(mfo.execute_phase(id, PhaseExecutionRequest::new("a")),
                              mfo.execute_phase(id, PhaseExecutionRequest::new("b")));
    assert_eq!(a.unwrap().status, PhaseExecutionStatus::Completed);
    assert_eq!(b.unwrap().status, PhaseExecutionStatus::Completed);
    assert_eq!(handler.calls(), 2);

    let flow = h.repository.get_by_flow_id(&mfo.context().scope(), id).await.unwrap().unwrap();
    assert!(flow.persistence_data.is_phase_completed("a"));
    assert!(flow.persistence_data.is_phase_completed("b"));

    let last = mfo.execute_phase(id, PhaseExecutionRequest::new("c")).await.unwrap();
    assert_eq!(last.status, PhaseExecutionStatus::Completed);
    assert_eq!(last.flow_status, Some(FlowStatus::Completed));
}

#[tokio::test]
async fn delete_during_phase_is_not_undone() {
    let handler = CountingHandler::new(Duration::from_millis(100));
    let h = harness_with(registry_with(handler.clone()), InMemoryCacheGateway::new(), fast_config());
    let mfo = &h.orchestrator;
    let id = mfo.create_flow(CreateFlowRequest::new("assessment")).await.unwrap().flow_id;

    let (executed, deleted) = tokio::join!(mfo.execute_phase(id, PhaseExecutionRequest::new("readiness_check")),
                                           async {
                                               tokio::time::sleep(Duration::from_millis(30)).await;
                                               mfo.delete_flow(id, Some("cleanup".into())).await
                                           });
    assert_eq!(deleted.unwrap().flow.flow_status, FlowStatus::Deleted);
    assert!(matches!(executed,
                     Err(OrchestratorError::InvalidState { status: FlowStatus::Deleted, .. })));

    let flow = h.repository.get_by_flow_id(&mfo.context().scope(), id).await.unwrap().unwrap();
    assert_eq!(flow.flow_status, FlowStatus::Deleted);
    assert!(!flow.persistence_data.is_phase_completed("readiness_check"));
    let child = h.repository.get_child(&mfo.context().scope(), id).await.unwrap().unwrap();
    assert_eq!(child.parsed_status(), Some(FlowStatus::Deleted));
}

#[tokio::test]
async fn pause_during_phase_is_not_undone() {
    let handler = CountingHandler::new(Duration::from_millis(100));
    let h = harness_with(registry_with(handler.clone()), InMemoryCacheGateway::new(), fast_config());
    let mfo = &h.orchestrator;
    let id = mfo.create_flow(CreateFlowRequest::new("assessment")).await.unwrap().flow_id;

    let (executed, paused) = tokio::join!(mfo.execute_phase(id, PhaseExecutionRequest::new("readiness_check")),
                                          async {
                                              tokio::time::sleep(Duration::from_millis(30)).await;
                                              mfo.pause_flow(id, None).await
                                          });
    assert!(matches!(paused.unwrap(), PauseOutcome::Paused { .. }));
    let executed = executed.unwrap();
    assert_eq!(executed.status, PhaseExecutionStatus::Completed);
    assert_eq!(executed.flow_status, Some(FlowStatus::Paused));

    let flow = h.repository.get_by_flow_id(&mfo.context().scope(), id).await.unwrap().unwrap();
    assert_eq!(flow.flow_status, FlowStatus::Paused);
    assert!(flow.persistence_data.is_phase_completed("readiness_check"));
    assert!(flow.persistence_data.pause_state.is_some());
    let child = h.repository.get_child(&mfo.context().scope(), id).await.unwrap().unwrap();
    assert_eq!(child.parsed_status(), Some(FlowStatus::Paused));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_phase_holds_the_lock_until_done() {
    let handler = CountingHandler::new(Duration::from_millis(50));
    let h = harness_with(registry_with(handler.clone()), InMemoryCacheGateway::new(), fast_config());
    let mfo = &h.orchestrator;
    let id = mfo.create_flow(CreateFlowRequest::new("assessment")).await.unwrap().flow_id;

    let ScheduledExecution::Scheduled { phase, handle } =
        mfo.schedule_phase_execution(id, PhaseExecutionRequest::new("readiness_check"))
    else {
        panic!("expected scheduling");
    };
    assert_eq!(phase, "readiness_check");
    assert!(matches!(mfo.schedule_phase_execution(id, PhaseExecutionRequest::new("readiness_check")),
                     ScheduledExecution::AlreadyRunning { .. }));
    let skipped = mfo.execute_phase(id, PhaseExecutionRequest::new("readiness_check")).await.unwrap();
    assert_eq!(skipped.status, PhaseExecutionStatus::DuplicateSkipped);

    let result = handle.await.expect("task joined").unwrap();
    assert_eq!(result.status, PhaseExecutionStatus::Completed);
    assert!(!mfo.phase_locks().is_locked(id, "readiness_check"));
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn auto_execute_resume_schedules_next_phase() {
    let h = harness();
    let mfo = &h.orchestrator;
    let id = mfo.create_flow(CreateFlowRequest::new("assessment")).await.unwrap().flow_id;
    mfo.pause_flow(id, None).await.unwrap();

    let resume = ResumeContext { user_input: json!({ "auto_execute": true }),
                                 ..ResumeContext::default() };
    let outcome = mfo.resume_flow(id, Some(resume)).await.unwrap();
    let ResumeOutcome::Resumed { flow, execution: ResumeExecution::Scheduled { phase, handle } } = outcome else {
        panic!("expected scheduled execution");
    };
    assert_eq!(flow.flow_status, FlowStatus::Running);
    assert_eq!(phase, "readiness_check");

    let result = handle.await.expect("task joined").unwrap();
    assert_eq!(result.status, PhaseExecutionStatus::Completed);
    let status = mfo.get_flow_status(id, false).await.unwrap();
    assert!(status.completed_phases.contains(&"readiness_check".to_string()));
}

#[tokio::test]
async fn resume_reports_phase_already_running() {
    let h = harness();
    let mfo = &h.orchestrator;
    let id = mfo.create_flow(CreateFlowRequest::new("assessment")).await.unwrap().flow_id;
    mfo.pause_flow(id, None).await.unwrap();

    let _held = mfo.phase_locks().try_lock(id, "readiness_check").expect("free lock");
    let resume = ResumeContext { user_input: json!({ "auto_execute": true }),
                                 ..ResumeContext::default() };
    let outcome = mfo.resume_flow(id, Some(resume)).await.unwrap();
    assert!(matches!(outcome, ResumeOutcome::AlreadyRunning { ref phase, .. } if phase == "readiness_check"));
    assert_eq!(mfo.get_flow_status(id, false).await.unwrap().flow_status, FlowStatus::Paused);
}
