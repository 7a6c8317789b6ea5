use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;

use super::{CacheGateway, CachedFlowEntry};
use crate::errors::CacheError;
use crate::model::{Flow, FlowId, FlowStatus};

/// Cache distribuida simulada sobre `DashMap`.
///
/// `fail_next_registrations` permite provocar fallos de registro en tests
/// de atomicidad de creación.
#[derive(Debug)]
pub struct InMemoryCacheGateway {
    entries: DashMap<FlowId, CachedFlowEntry>,
    available: AtomicBool,
    failing_registrations: AtomicUsize,
}

impl Default for InMemoryCacheGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCacheGateway {
    pub fn new() -> Self {
        Self { entries: DashMap::new(),
               available: AtomicBool::new(true),
               failing_registrations: AtomicUsize::new(0) }
    }

    /// Gateway sin backend: todas las operaciones devuelven `Unavailable`.
    pub fn unavailable() -> Self {
        let gateway = Self::new();
        gateway.set_available(false);
        gateway
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_next_registrations(&self, count: usize) {
        self.failing_registrations.store(count, Ordering::SeqCst);
    }

    pub fn contains(&self, flow_id: FlowId) -> bool {
        self.entries.contains_key(&flow_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(CacheError::Unavailable)
        }
    }
}

#[async_trait]
impl CacheGateway for InMemoryCacheGateway {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn register_flow_atomic(&self, flow: &Flow) -> Result<(), CacheError> {
        self.ensure_available()?;
        let injected = self.failing_registrations
                           .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                           .is_ok();
        if injected {
            return Err(CacheError::Operation(format!("register rejected for {}", flow.flow_id)));
        }
        debug!("cache:register flow_id={}", flow.flow_id);
        self.entries.insert(flow.flow_id, CachedFlowEntry::from(flow));
        Ok(())
    }

    async fn update_flow_status(&self, flow_id: FlowId, status: FlowStatus) -> Result<(), CacheError> {
        self.ensure_available()?;
        if let Some(mut entry) = self.entries.get_mut(&flow_id) {
            entry.flow_status = status;
            entry.cached_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn cleanup_partial_flow_registration(&self, flow_id: FlowId) -> Result<(), CacheError> {
        self.ensure_available()?;
        self.entries.remove(&flow_id);
        Ok(())
    }

    async fn invalidate_flow_cache(&self, flow_id: FlowId) -> Result<(), CacheError> {
        self.ensure_available()?;
        debug!("cache:invalidate flow_id={flow_id}");
        self.entries.remove(&flow_id);
        Ok(())
    }

    async fn warm_flow(&self, flow: &Flow) -> Result<(), CacheError> {
        self.ensure_available()?;
        self.entries.insert(flow.flow_id, CachedFlowEntry::from(flow));
        Ok(())
    }

    async fn get_cached_flow(&self, flow_id: FlowId) -> Result<Option<CachedFlowEntry>, CacheError> {
        self.ensure_available()?;
        Ok(self.entries.get(&flow_id).map(|e| e.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TenantScope;
    use crate::registry::FlowType;
    use uuid::Uuid;

    fn flow() -> Flow {
        Flow::new(FlowId::new(),
                  FlowType::Planning,
                  "olas",
                  TenantScope::new(Uuid::new_v4(), Uuid::new_v4()),
                  "tester",
                  "initialization")
    }

    #[tokio::test]
    async fn unavailable_gateway_rejects_every_operation() {
        let cache = InMemoryCacheGateway::unavailable();
        let f = flow();
        assert_eq!(cache.register_flow_atomic(&f).await, Err(CacheError::Unavailable));
        assert_eq!(cache.invalidate_flow_cache(f.flow_id).await, Err(CacheError::Unavailable));
    }

    #[tokio::test]
    async fn injected_failure_is_consumed_once() {
        let cache = InMemoryCacheGateway::new();
        cache.fail_next_registrations(1);
        let f = flow();
        assert!(cache.register_flow_atomic(&f).await.is_err());
        assert!(!cache.contains(f.flow_id));
        cache.register_flow_atomic(&f).await.unwrap();
        assert!(cache.contains(f.flow_id));
    }

    #[tokio::test]
    async fn status_update_touches_existing_entry_only() {
        let cache = InMemoryCacheGateway::new();
        let f = flow();
        cache.update_flow_status(f.flow_id, FlowStatus::Paused).await.unwrap();
        assert!(cache.is_empty());
        cache.warm_flow(&f).await.unwrap();
        cache.update_flow_status(f.flow_id, FlowStatus::Paused).await.unwrap();
        let entry = cache.get_cached_flow(f.flow_id).await.unwrap().unwrap();
        assert_eq!(entry.flow_status, FlowStatus::Paused);
    }
}
