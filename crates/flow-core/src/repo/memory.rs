//! Repositorio en memoria.
//!
//! Ambas tablas viven bajo un único `RwLock`; `commit` aplica las escrituras
//! sobre una copia y la publica sólo si todas tuvieron éxito.
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{apply_mirror, FlowQuery, FlowRepository, FlowTransaction, FlowWrite};
use crate::errors::RepositoryError;
use crate::model::{ChildFlowRecord, Flow, FlowId, TenantScope};

#[derive(Debug, Default, Clone)]
struct Tables {
    masters: HashMap<FlowId, Flow>,
    children: HashMap<FlowId, ChildFlowRecord>,
}

impl Tables {
    fn apply(&mut self, write: FlowWrite) -> Result<(), RepositoryError> {
        match write {
            FlowWrite::InsertMaster(flow) => {
                if self.masters.contains_key(&flow.flow_id) {
                    return Err(RepositoryError::Conflict(format!("master {} already exists", flow.flow_id)));
                }
                self.masters.insert(flow.flow_id, flow);
            }
            FlowWrite::UpdateMaster { flow, expected_revision } => {
                let slot = self.masters
                               .get_mut(&flow.flow_id)
                               .ok_or_else(|| RepositoryError::NotFound(format!("master {}", flow.flow_id)))?;
                if slot.revision != expected_revision {
                    return Err(RepositoryError::Conflict(format!("master {} is at revision {}, expected {expected_revision}",
                                                                 flow.flow_id, slot.revision)));
                }
                *slot = flow;
            }
            FlowWrite::DiscardMaster(flow_id) => {
                self.masters.remove(&flow_id);
            }
            FlowWrite::InsertChild(child) => {
                if self.children.contains_key(&child.flow_id) {
                    return Err(RepositoryError::Conflict(format!("child {} already exists", child.flow_id)));
                }
                self.children.insert(child.flow_id, child);
            }
            FlowWrite::MirrorChildStatus { master_flow_id,
                                           status,
                                           current_phase,
                                           progress_percentage, } => {
                for child in self.children
                                 .values_mut()
                                 .filter(|c| c.master_flow_id == Some(master_flow_id))
                {
                    apply_mirror(child, status, &current_phase, progress_percentage);
                }
            }
            FlowWrite::LinkChild { flow_id, master_flow_id } => {
                let child = self.children
                                .get_mut(&flow_id)
                                .ok_or_else(|| RepositoryError::NotFound(format!("child {flow_id}")))?;
                child.master_flow_id = Some(master_flow_id);
                child.updated_at = chrono::Utc::now();
            }
            FlowWrite::MarkChildForDeletion { flow_id } => {
                let child = self.children
                                .get_mut(&flow_id)
                                .ok_or_else(|| RepositoryError::NotFound(format!("child {flow_id}")))?;
                child.marked_for_deletion = true;
                child.updated_at = chrono::Utc::now();
            }
            FlowWrite::DiscardChild(flow_id) => {
                self.children.remove(&flow_id);
            }
        }
        Ok(())
    }
}

/// Backend por defecto para tests y demos.
#[derive(Debug, Default)]
pub struct InMemoryFlowRepository {
    tables: RwLock<Tables>,
}

impl InMemoryFlowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn master_count(&self) -> usize {
        self.tables.read().await.masters.len()
    }

    pub async fn child_count(&self) -> usize {
        self.tables.read().await.children.len()
    }
}

#[async_trait]
impl FlowRepository for InMemoryFlowRepository {
    async fn get_by_flow_id(&self, scope: &TenantScope, flow_id: FlowId) -> Result<Option<Flow>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.masters.get(&flow_id).filter(|f| f.belongs_to(scope)).cloned())
    }

    async fn list_flows(&self, query: &FlowQuery) -> Result<Vec<Flow>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut flows: Vec<Flow> = tables.masters.values().filter(|f| query.matches(f)).cloned().collect();
        flows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        flows.truncate(query.limit);
        Ok(flows)
    }

    async fn get_child(&self, scope: &TenantScope, flow_id: FlowId) -> Result<Option<ChildFlowRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.children.get(&flow_id).filter(|c| c.scope() == *scope).cloned())
    }

    async fn find_related_children(&self,
                                   scope: &TenantScope,
                                   flow_id: FlowId)
                                   -> Result<Vec<ChildFlowRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.children
                 .values()
                 .filter(|c| c.scope() == *scope)
                 .filter(|c| c.flow_id == flow_id || c.master_flow_id == Some(flow_id))
                 .cloned()
                 .collect())
    }

    async fn list_children(&self, scope: &TenantScope) -> Result<Vec<ChildFlowRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut children: Vec<ChildFlowRecord> =
            tables.children.values().filter(|c| c.scope() == *scope).cloned().collect();
        children.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(children)
    }

    async fn commit(&self, tx: FlowTransaction) -> Result<(), RepositoryError> {
        if tx.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables.write().await;
        let mut working = tables.clone();
        for write in tx.into_writes() {
            let kind = write.kind();
            working.apply(write).map_err(|e| {
                                    log::warn!("commit:aborted write={kind} err={e}");
                                    e
                                })?;
        }
        *tables = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlowStatus, TenantScope};
    use crate::registry::FlowType;
    use serde_json::json;
    use uuid::Uuid;

    fn scope() -> TenantScope {
        TenantScope::new(Uuid::new_v4(), Uuid::new_v4())
    }

    fn flow(scope: TenantScope) -> Flow {
        Flow::new(FlowId::new(), FlowType::Discovery, "inventario", scope, "tester", "initialization")
    }

    #[tokio::test]
    async fn commit_is_all_or_nothing() {
        let repo = InMemoryFlowRepository::new();
        let s = scope();
        let f = flow(s);
        let mut tx = FlowTransaction::new();
        tx.insert_master(f.clone());
        tx.link_child(FlowId::new(), f.flow_id);
        let err = repo.commit(tx).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
        assert_eq!(repo.master_count().await, 0);
    }

    #[tokio::test]
    async fn reads_are_tenant_scoped() {
        let repo = InMemoryFlowRepository::new();
        let s = scope();
        let f = flow(s);
        let mut tx = FlowTransaction::new();
        tx.insert_master(f.clone());
        tx.insert_child(ChildFlowRecord::new(f.flow_id, f.flow_type, s, json!({})));
        repo.commit(tx).await.unwrap();

        assert!(repo.get_by_flow_id(&s, f.flow_id).await.unwrap().is_some());
        let other = scope();
        assert!(repo.get_by_flow_id(&other, f.flow_id).await.unwrap().is_none());
        assert!(repo.get_child(&other, f.flow_id).await.unwrap().is_none());
        assert_eq!(repo.find_related_children(&s, f.flow_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mirror_updates_linked_children() {
        let repo = InMemoryFlowRepository::new();
        let s = scope();
        let mut f = flow(s);
        let mut tx = FlowTransaction::new();
        tx.insert_master(f.clone());
        tx.insert_child(ChildFlowRecord::new(f.flow_id, f.flow_type, s, json!({})));
        repo.commit(tx).await.unwrap();

        f.flow_status = FlowStatus::Paused;
        let mut tx = FlowTransaction::new();
        tx.update_master(&mut f);
        tx.mirror_child_status(&f);
        repo.commit(tx).await.unwrap();

        let child = repo.get_child(&s, f.flow_id).await.unwrap().unwrap();
        assert_eq!(child.parsed_status(), Some(FlowStatus::Paused));
    }

    #[tokio::test]
    async fn stale_update_is_a_conflict() {
        let repo = InMemoryFlowRepository::new();
        let s = scope();
        let f = flow(s);
        let mut tx = FlowTransaction::new();
        tx.insert_master(f.clone());
        repo.commit(tx).await.unwrap();

        let mut first = f.clone();
        let mut stale = f.clone();
        first.flow_status = FlowStatus::Deleted;
        let mut tx = FlowTransaction::new();
        tx.update_master(&mut first);
        repo.commit(tx).await.unwrap();

        stale.flow_status = FlowStatus::Running;
        let mut tx = FlowTransaction::new();
        tx.update_master(&mut stale);
        assert!(matches!(repo.commit(tx).await, Err(RepositoryError::Conflict(_))));
        let stored = repo.get_by_flow_id(&s, f.flow_id).await.unwrap().unwrap();
        assert_eq!(stored.flow_status, FlowStatus::Deleted);
        assert_eq!(stored.revision, 1);
    }

    #[tokio::test]
    async fn chained_updates_in_one_transaction_apply_in_order() {
        let repo = InMemoryFlowRepository::new();
        let s = scope();
        let mut f = flow(s);
        let mut tx = FlowTransaction::new();
        tx.insert_master(f.clone());
        repo.commit(tx).await.unwrap();

        let mut tx = FlowTransaction::new();
        f.flow_status = FlowStatus::Running;
        tx.update_master(&mut f);
        f.current_phase = "data_import".into();
        tx.update_master(&mut f);
        repo.commit(tx).await.unwrap();

        let stored = repo.get_by_flow_id(&s, f.flow_id).await.unwrap().unwrap();
        assert_eq!(stored.revision, 2);
        assert_eq!(stored, f);
    }

    #[tokio::test]
    async fn list_flows_hides_deleted_by_default() {
        let repo = InMemoryFlowRepository::new();
        let s = scope();
        let live = flow(s);
        let mut gone = flow(s);
        gone.flow_status = FlowStatus::Deleted;
        let mut tx = FlowTransaction::new();
        tx.insert_master(live.clone());
        tx.insert_master(gone);
        repo.commit(tx).await.unwrap();

        let listed = repo.list_flows(&FlowQuery::for_scope(&s, 10)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].flow_id, live.flow_id);
    }
}
