//! Registro de auditoría append-only.
//!
//! Cada operación del orquestador emite un evento tanto en éxito como en
//! fallo, antes de devolver.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use log::{info, warn};
use serde_json::Value;

use flow_core::constants::ORCHESTRATOR_VERSION;
use flow_core::{AuditCategory, AuditEvent, AuditLevel, FlowId};

/// Destino de los eventos. Los eventos nunca se modifican tras escribirse.
pub trait AuditSink: Send + Sync {
    /// Asigna `seq` y persiste el evento.
    fn append(&self, event: AuditEvent) -> AuditEvent;
    /// Eventos del flujo en orden de escritura.
    fn list(&self, flow_id: FlowId) -> Vec<AuditEvent>;
}

#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: DashMap<FlowId, Vec<AuditEvent>>,
    next_seq: AtomicU64,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.events.iter().map(|e| e.value().len()).sum()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn append(&self, mut event: AuditEvent) -> AuditEvent {
        event.seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.events.entry(event.flow_id).or_default().push(event.clone());
        event
    }

    fn list(&self, flow_id: FlowId) -> Vec<AuditEvent> {
        let mut events = self.events.get(&flow_id).map(|e| e.value().clone()).unwrap_or_default();
        events.sort_by_key(|e| e.seq);
        events
    }
}

/// Borrador de evento; `AuditLogger::record` completa seq y timestamp.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub flow_id: FlowId,
    pub operation: String,
    pub category: AuditCategory,
    pub level: AuditLevel,
    pub success: bool,
    pub details: Value,
    pub error: Option<String>,
    pub actor: String,
}

impl AuditEntry {
    pub fn success(flow_id: FlowId, operation: &str, category: AuditCategory, actor: &str) -> Self {
        Self { flow_id,
               operation: operation.to_string(),
               category,
               level: AuditLevel::Info,
               success: true,
               details: Value::Null,
               error: None,
               actor: actor.to_string() }
    }

    pub fn failure(flow_id: FlowId, operation: &str, category: AuditCategory, actor: &str, error: impl ToString) -> Self {
        Self { level: AuditLevel::Error,
               success: false,
               error: Some(error.to_string()),
               ..Self::success(flow_id, operation, category, actor) }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuditLogger")
    }
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn record(&self, entry: AuditEntry) -> AuditEvent {
        let details = match entry.details {
            Value::Object(mut map) => {
                map.entry("orchestrator_version").or_insert_with(|| Value::from(ORCHESTRATOR_VERSION));
                Value::Object(map)
            }
            Value::Null => serde_json::json!({ "orchestrator_version": ORCHESTRATOR_VERSION }),
            other => serde_json::json!({ "value": other, "orchestrator_version": ORCHESTRATOR_VERSION }),
        };
        let event = AuditEvent { seq: 0,
                                 flow_id: entry.flow_id,
                                 operation: entry.operation,
                                 category: entry.category,
                                 level: entry.level,
                                 success: entry.success,
                                 details,
                                 error: entry.error,
                                 timestamp: Utc::now(),
                                 actor: entry.actor };
        if event.success {
            info!("audit:{} flow_id={} actor={}", event.operation, event.flow_id, event.actor);
        } else {
            warn!("audit:{} flow_id={} actor={} error={}",
                  event.operation,
                  event.flow_id,
                  event.actor,
                  event.error.as_deref().unwrap_or("-"));
        }
        self.sink.append(event)
    }

    pub fn trail(&self, flow_id: FlowId) -> Vec<AuditEvent> {
        self.sink.list(flow_id)
    }
}
