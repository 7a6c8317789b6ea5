//! `persistence_data` versionado.
//!
//! El blob pertenece al handler de fases salvo dos sub-secciones que el
//! orquestador conoce: `pause_state` y `phase_completion`. El resto viaja en
//! `handler_payload`, opaco para el orquestador. Desde el orquestador el blob
//! es append-only: nunca se borran entradas de `phase_completion`.
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::FlowStatus;
use crate::constants::PERSISTENCE_DATA_VERSION;

/// Snapshot escrito justo antes de transicionar a `paused`.
///
/// Sólo informativo al reanudar: las columnas del master son la fuente de
/// verdad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseSnapshot {
    pub preserved_at: DateTime<Utc>,
    pub current_phase: String,
    pub progress_percentage: f64,
    pub flow_status: FlowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Registro de finalización de una fase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCompletionEntry {
    pub completed: bool,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub summary: Value,
    /// La fase se ejecutó con `force_execution`.
    #[serde(default)]
    pub forced: bool,
}

impl PhaseCompletionEntry {
    pub fn completed_now(duration_ms: u64, summary: Value) -> Self {
        Self { completed: true,
               completed_at: Utc::now(),
               duration_ms,
               summary,
               forced: false }
    }
}

fn default_version() -> u32 {
    PERSISTENCE_DATA_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceData {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_state: Option<PauseSnapshot>,
    /// Fases completadas en orden de finalización.
    #[serde(default)]
    pub phase_completion: IndexMap<String, PhaseCompletionEntry>,
    /// Estado propio del tipo de flujo.
    #[serde(default)]
    pub handler_payload: Value,
}

impl Default for PersistenceData {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl PersistenceData {
    pub fn new(handler_payload: Value) -> Self {
        Self { version: PERSISTENCE_DATA_VERSION,
               pause_state: None,
               phase_completion: IndexMap::new(),
               handler_payload }
    }

    /// `true` si la fase figura completada.
    pub fn is_phase_completed(&self, phase: &str) -> bool {
        self.phase_completion.get(phase).map(|e| e.completed).unwrap_or(false)
    }

    /// Nombres de fases completadas, en orden de finalización.
    pub fn completed_phases(&self) -> Vec<String> {
        self.phase_completion
            .iter()
            .filter(|(_, e)| e.completed)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Registra (o re-registra, si fue forzada) la finalización de una fase.
    /// La posición original en el índice se conserva.
    pub fn record_phase_completion(&mut self, phase: &str, entry: PhaseCompletionEntry) {
        self.phase_completion.insert(phase.to_string(), entry);
    }

    pub fn record_pause(&mut self, snapshot: PauseSnapshot) {
        self.pause_state = Some(snapshot);
    }

    /// Fusiona un parche del handler en `handler_payload`.
    ///
    /// Objeto + objeto se fusiona a un nivel; cualquier otra combinación
    /// reemplaza el valor. `Null` no modifica nada.
    pub fn merge_handler_payload(&mut self, patch: Value) {
        match (&mut self.handler_payload, patch) {
            (_, Value::Null) => {}
            (Value::Object(current), Value::Object(incoming)) => {
                for (k, v) in incoming {
                    current.insert(k, v);
                }
            }
            (slot, other) => *slot = other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_keeps_insertion_order() {
        let mut data = PersistenceData::default();
        data.record_phase_completion("initialization", PhaseCompletionEntry::completed_now(1, json!({})));
        data.record_phase_completion("readiness_check", PhaseCompletionEntry::completed_now(2, json!({})));
        data.record_phase_completion("initialization", PhaseCompletionEntry::completed_now(3, json!({"again": true})));
        assert_eq!(data.completed_phases(), vec!["initialization".to_string(), "readiness_check".to_string()]);
        assert_eq!(data.phase_completion["initialization"].duration_ms, 3);
    }

    #[test]
    fn payload_merge_is_shallow_and_ignores_null() {
        let mut data = PersistenceData::new(json!({"a": 1, "nested": {"x": 1}}));
        data.merge_handler_payload(json!({"b": 2, "nested": {"y": 2}}));
        data.merge_handler_payload(Value::Null);
        assert_eq!(data.handler_payload, json!({"a": 1, "b": 2, "nested": {"y": 2}}));
    }

    #[test]
    fn legacy_blob_without_version_deserializes() {
        let raw = json!({"phase_completion": {"initialization": {"completed": true, "completed_at": "2024-01-01T00:00:00Z", "duration_ms": 5}}});
        let data: PersistenceData = serde_json::from_value(raw).expect("legacy blob");
        assert_eq!(data.version, PERSISTENCE_DATA_VERSION);
        assert!(data.is_phase_completed("initialization"));
        assert!(data.pause_state.is_none());
    }
}
