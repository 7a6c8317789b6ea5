use masterflow::config::CONFIG;
use masterflow::runtime::{in_memory_orchestrator, tenant_context};
use serde_json::json;
use uuid::Uuid;

use flow_orchestrator::{CreateFlowRequest, MasterFlowOrchestrator, PauseOutcome, PhaseExecutionRequest, ResumeOutcome};

/// Recorre un assessment completo: crear, ejecutar fases, pausar, reanudar,
/// consultar estado y borrar.
async fn run_assessment_demo(mfo: &MasterFlowOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
    let created = mfo.create_flow(CreateFlowRequest::new("assessment").named("Q3 portfolio")).await?;
    let id = created.flow_id;
    println!("[create] flow_id={id} status={} cache_registered={}",
             created.flow.flow_status, created.cache_registered);

    let readiness = mfo.execute_phase(id,
                                      PhaseExecutionRequest::new("readiness_check")
                                      .with_input(json!({ "applications": [{ "name": "billing", "ready": true }] })))
                       .await?;
    println!("[execute] phase={} status={:?} progress={:?}",
             readiness.phase, readiness.status, readiness.progress_percentage);

    // Sin readiness_check completada esta fase sería rechazada.
    let complexity = mfo.execute_phase(id, PhaseExecutionRequest::new("complexity_analysis")).await?;
    println!("[execute] phase={} status={:?}", complexity.phase, complexity.status);

    match mfo.pause_flow(id, Some("maintenance window".into())).await? {
        PauseOutcome::Paused { flow } => println!("[pause] status={} phase={}", flow.flow_status, flow.current_phase),
        PauseOutcome::AlreadyPaused { status, .. } => println!("[pause] already {status}"),
    }

    match mfo.resume_flow(id, None).await? {
        ResumeOutcome::Resumed { flow, .. } => println!("[resume] status={}", flow.flow_status),
        other => println!("[resume] not resumed: {other:?}"),
    }

    let status = mfo.get_flow_status(id, true).await?;
    println!("[status] {} {} progress={:.1} completed={:?}",
             status.flow_status, status.flow_type, status.progress_percentage, status.completed_phases);

    let deleted = mfo.delete_flow(id, Some("demo finished".into())).await?;
    println!("[delete] status={} invalidation_complete={}",
             deleted.flow.flow_status,
             deleted.invalidation.is_complete());

    for event in mfo.get_flow_audit_trail(id) {
        println!("[audit] {} {:?} {}", event.timestamp, event.category, event.operation);
    }
    for (op, stats) in mfo.get_performance_summary().operations {
        println!("[perf] {op} count={} failures={} avg_ms={:.2}", stats.count, stats.failures, stats.avg_ms());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let context = tenant_context(&CONFIG, Uuid::new_v4(), Uuid::new_v4());

    #[cfg(feature = "pg_demo")]
    let mfo = match CONFIG.database_url {
        Some(_) => masterflow::runtime::postgres_orchestrator(&CONFIG, context)?,
        None => in_memory_orchestrator(&CONFIG, context)?,
    };
    #[cfg(not(feature = "pg_demo"))]
    let mfo = in_memory_orchestrator(&CONFIG, context)?;

    run_assessment_demo(&mfo).await
}
