//! Buffer de escrituras de una transacción.
//!
//! Una `FlowTransaction` acumula `FlowWrite`s en orden; el backend las
//! aplica todas o ninguna en `FlowRepository::commit`. Así master y child se
//! actualizan juntos aunque vivan en tablas distintas. El llamador que
//! recibe `&mut FlowTransaction` es dueño del límite transaccional.
use std::collections::HashMap;

use chrono::Utc;

use crate::model::{ChildFlowRecord, Flow, FlowId, FlowStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum FlowWrite {
    InsertMaster(Flow),
    /// Falla con `Conflict` si la revisión almacenada no es
    /// `expected_revision`.
    UpdateMaster { flow: Flow, expected_revision: i64 },
    /// Compensación de una creación fallida (nunca usado como borrado de
    /// negocio: el borrado de negocio es soft).
    DiscardMaster(FlowId),
    InsertChild(ChildFlowRecord),
    /// Copia estado/fase/progreso del master en los child enlazados.
    MirrorChildStatus { master_flow_id: FlowId, status: FlowStatus, current_phase: String, progress_percentage: f64 },
    LinkChild { flow_id: FlowId, master_flow_id: FlowId },
    MarkChildForDeletion { flow_id: FlowId },
    DiscardChild(FlowId),
}

impl FlowWrite {
    /// Nombre estable para logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowWrite::InsertMaster(_) => "insert_master",
            FlowWrite::UpdateMaster { .. } => "update_master",
            FlowWrite::DiscardMaster(_) => "discard_master",
            FlowWrite::InsertChild(_) => "insert_child",
            FlowWrite::MirrorChildStatus { .. } => "mirror_child_status",
            FlowWrite::LinkChild { .. } => "link_child",
            FlowWrite::MarkChildForDeletion { .. } => "mark_child_for_deletion",
            FlowWrite::DiscardChild(_) => "discard_child",
        }
    }
}

#[derive(Debug, Default)]
pub struct FlowTransaction {
    writes: Vec<FlowWrite>,
    staged: HashMap<FlowId, Flow>,
}

impl FlowTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_master(&mut self, flow: Flow) {
        self.staged.insert(flow.flow_id, flow.clone());
        self.writes.push(FlowWrite::InsertMaster(flow));
    }

    /// Prepara la escritura contra la revisión actual de `flow` y deja
    /// `flow` en la revisión que tendrá tras el commit.
    pub fn update_master(&mut self, flow: &mut Flow) {
        let expected_revision = flow.revision;
        flow.revision += 1;
        self.staged.insert(flow.flow_id, flow.clone());
        self.writes.push(FlowWrite::UpdateMaster { flow: flow.clone(),
                                                   expected_revision });
    }

    pub fn discard_master(&mut self, flow_id: FlowId) {
        self.staged.remove(&flow_id);
        self.writes.push(FlowWrite::DiscardMaster(flow_id));
    }

    pub fn insert_child(&mut self, child: ChildFlowRecord) {
        self.writes.push(FlowWrite::InsertChild(child));
    }

    pub fn mirror_child_status(&mut self, flow: &Flow) {
        self.writes.push(FlowWrite::MirrorChildStatus { master_flow_id: flow.flow_id,
                                                        status: flow.flow_status,
                                                        current_phase: flow.current_phase.clone(),
                                                        progress_percentage: flow.progress_percentage });
    }

    pub fn link_child(&mut self, flow_id: FlowId, master_flow_id: FlowId) {
        self.writes.push(FlowWrite::LinkChild { flow_id, master_flow_id });
    }

    pub fn mark_child_for_deletion(&mut self, flow_id: FlowId) {
        self.writes.push(FlowWrite::MarkChildForDeletion { flow_id });
    }

    pub fn discard_child(&mut self, flow_id: FlowId) {
        self.writes.push(FlowWrite::DiscardChild(flow_id));
    }

    /// Lectura de las escrituras propias (read-your-writes) sobre masters.
    pub fn staged_master(&self, flow_id: FlowId) -> Option<&Flow> {
        self.staged.get(&flow_id)
    }

    pub fn writes(&self) -> &[FlowWrite] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn into_writes(self) -> Vec<FlowWrite> {
        self.writes
    }
}

/// Aplica una escritura de espejo sobre un child ya cargado. Compartido por
/// los backends para que la semántica sea idéntica.
pub fn apply_mirror(child: &mut ChildFlowRecord, status: FlowStatus, current_phase: &str, progress: f64) {
    child.status = Some(status.as_str().to_string());
    child.current_phase = Some(current_phase.to_string());
    child.progress_percentage = progress;
    child.updated_at = Utc::now();
}
