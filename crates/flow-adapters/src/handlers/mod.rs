//! Handler estándar compartido por los tipos de flujo del catálogo.
pub mod summaries;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde_json::{json, Value};

use flow_core::{Flow, HandlerError, PhaseHandler, PhaseInitialization, PhaseOutcome, ResumeDirective, ResumeState};

use crate::catalog::FlowTypeSpec;

#[derive(Debug, Clone)]
pub struct StandardPhaseHandler {
    spec: &'static FlowTypeSpec,
}

impl StandardPhaseHandler {
    pub fn new(spec: &'static FlowTypeSpec) -> Self {
        Self { spec }
    }

    pub fn shared(spec: &'static FlowTypeSpec) -> Arc<dyn PhaseHandler> {
        Arc::new(Self::new(spec))
    }

    fn next_after(&self, phase: &str) -> Option<&'static str> {
        let names = self.spec.phase_names();
        let idx = names.iter().position(|p| *p == phase)?;
        names.get(idx + 1).copied()
    }

    /// Primera fase pendiente cuyas dependencias ya están completas.
    fn next_runnable(&self, flow: &Flow) -> Option<&'static str> {
        let done = &flow.persistence_data;
        self.spec
            .phases
            .iter()
            .find(|(name, deps, _)| !done.is_phase_completed(name) && deps.iter().all(|d| done.is_phase_completed(d)))
            .map(|(name, _, _)| *name)
    }
}

#[async_trait]
impl PhaseHandler for StandardPhaseHandler {
    async fn initialize(&self, flow: &Flow) -> Result<PhaseInitialization, HandlerError> {
        let child_data = self.spec.creates_child.then(|| {
                                                     json!({ "flow_type": flow.flow_type,
                                                             "configuration": flow.configuration,
                                                             "phase_data": {} })
                                                 });
        Ok(PhaseInitialization { child_data,
                                 payload: json!({ "initialized_at": Utc::now() }),
                                 summary: json!({ "initialized": true, "phases": self.spec.phase_names() }),
                                 fallback: false })
    }

    async fn execute_phase(&self, flow: &Flow, phase: &str, input: &Value) -> Result<PhaseOutcome, HandlerError> {
        debug!("handler:{} flow_id={} phase={phase}", self.spec.flow_type, flow.flow_id);
        let summary = summaries::summarize(phase, input)?;
        let mut payload = serde_json::Map::new();
        payload.insert(phase.to_string(), summary.clone());

        let mut outcome = PhaseOutcome::with_summary(summary);
        outcome.payload = Value::Object(payload);
        outcome.next_phase = self.next_after(phase).map(str::to_string);
        outcome.requires_approval = input.get("require_approval").and_then(Value::as_bool).unwrap_or(false);
        Ok(outcome)
    }

    /// Con `auto_execute` en el input del usuario se programa la siguiente
    /// fase ejecutable; si no, la reanudación sólo cambia el estado.
    async fn resume_from_state(&self, state: ResumeState<'_>) -> Result<ResumeDirective, HandlerError> {
        let auto = state.context.user_input.get("auto_execute").and_then(Value::as_bool).unwrap_or(false);
        if !auto {
            return Ok(ResumeDirective::Continue);
        }
        Ok(match self.next_runnable(state.flow) {
               Some(phase) => ResumeDirective::ExecutePhase { phase: phase.to_string(),
                                                              input: state.context.user_input.clone() },
               None => ResumeDirective::Continue,
           })
    }

    async fn force_rerun_phase(&self, flow: &Flow, phase: &str) -> Result<(), HandlerError> {
        if !self.spec.phase_names().iter().any(|p| *p == phase) {
            return Err(HandlerError::Failed(format!("{} has no phase `{phase}`", self.spec.flow_type)));
        }
        debug!("handler:force_rerun flow_id={} phase={phase}", flow.flow_id);
        Ok(())
    }
}
