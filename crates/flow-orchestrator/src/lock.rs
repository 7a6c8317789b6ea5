//! Lock consultivo por (flow_id, fase).
//!
//! Sólo excluye dentro de este proceso. El guard es dueño de un `Arc` del
//! gestor para poder viajar dentro de una tarea de fondo.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;

use flow_core::FlowId;

#[derive(Debug, Default)]
pub struct PhaseLockManager {
    held: DashMap<(FlowId, String), DateTime<Utc>>,
}

impl PhaseLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// No bloqueante: `false` si el par ya está tomado.
    pub fn try_acquire_lock(&self, flow_id: FlowId, phase: &str) -> bool {
        match self.held.entry((flow_id, phase.to_string())) {
            Entry::Occupied(_) => {
                debug!("lock:busy flow_id={flow_id} phase={phase}");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                true
            }
        }
    }

    /// Devuelve `true` si el lock estaba tomado.
    pub fn release(&self, flow_id: FlowId, phase: &str) -> bool {
        self.held.remove(&(flow_id, phase.to_string())).is_some()
    }

    pub fn is_locked(&self, flow_id: FlowId, phase: &str) -> bool {
        self.held.contains_key(&(flow_id, phase.to_string()))
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Variante RAII de `try_acquire_lock`.
    pub fn try_lock(self: &Arc<Self>, flow_id: FlowId, phase: &str) -> Option<PhaseLockGuard> {
        self.try_acquire_lock(flow_id, phase).then(|| PhaseLockGuard { manager: Arc::clone(self),
                                                                       flow_id,
                                                                       phase: phase.to_string() })
    }
}

/// Libera el lock al soltarse.
#[derive(Debug)]
pub struct PhaseLockGuard {
    manager: Arc<PhaseLockManager>,
    flow_id: FlowId,
    phase: String,
}

impl PhaseLockGuard {
    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }
}

impl Drop for PhaseLockGuard {
    fn drop(&mut self) {
        self.manager.release(self.flow_id, &self.phase);
    }
}
