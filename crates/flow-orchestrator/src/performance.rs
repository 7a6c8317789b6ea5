//! Spans de duración por operación.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::debug;
use serde::Serialize;

use flow_core::FlowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

#[derive(Debug)]
struct OpenSpan {
    flow_id: Option<FlowId>,
    operation: String,
    started: Instant,
}

/// Acumulado por tipo de operación.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationStats {
    pub count: u64,
    pub failures: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

impl OperationStats {
    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub operations: BTreeMap<String, OperationStats>,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    open: DashMap<SpanId, OpenSpan>,
    stats: DashMap<String, OperationStats>,
    next_id: AtomicU64,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_operation(&self, flow_id: Option<FlowId>, operation: &str) -> SpanId {
        let id = SpanId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.open.insert(id,
                         OpenSpan { flow_id,
                                    operation: operation.to_string(),
                                    started: Instant::now() });
        id
    }

    /// Cierra el span. `None` si ya estaba cerrado.
    pub fn end_operation(&self, span: SpanId, success: bool) -> Option<Duration> {
        let (_, open) = self.open.remove(&span)?;
        let elapsed = open.started.elapsed();
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let mut stats = self.stats.entry(open.operation.clone()).or_default();
        stats.count += 1;
        stats.total_ms = stats.total_ms.saturating_add(ms);
        stats.max_ms = stats.max_ms.max(ms);
        if !success {
            stats.failures += 1;
        }
        debug!("perf:{} flow_id={} ms={ms} success={success}",
               open.operation,
               open.flow_id.map(|f| f.to_string()).unwrap_or_else(|| "-".into()));
        Some(elapsed)
    }

    pub fn summary(&self) -> PerformanceSummary {
        PerformanceSummary { operations: self.stats
                                             .iter()
                                             .map(|e| (e.key().clone(), e.value().clone()))
                                             .collect(),
                             in_flight: self.open.len() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_aggregate_per_operation() {
        let perf = PerformanceMonitor::new();
        let id = FlowId::new();
        let a = perf.start_operation(Some(id), "execute_phase");
        let b = perf.start_operation(Some(id), "execute_phase");
        assert_eq!(perf.summary().in_flight, 2);
        perf.end_operation(a, true);
        perf.end_operation(b, false);
        assert!(perf.end_operation(b, true).is_none());

        let summary = perf.summary();
        let stats = &summary.operations["execute_phase"];
        assert_eq!(stats.count, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(summary.in_flight, 0);
    }
}
