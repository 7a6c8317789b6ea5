//! Implementación Postgres (Diesel) de `FlowRepository`.
//!
//! - Cada `commit` aplica todas las escrituras de la `FlowTransaction` dentro
//!   de UNA transacción Diesel (`build_transaction().read_write()`): master y
//!   child quedan consistentes o no se escribe nada.
//! - Las lecturas filtran siempre por tenant (client + engagement).
//! - Diesel es síncrono: cada operación corre en `spawn_blocking` para no
//!   bloquear el runtime del orquestador.
//! - Errores transitorios (serialización, pool) se reintentan con backoff
//!   corto.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::{debug, error, warn};
use serde_json::{Map, Value};
use uuid::Uuid;

use flow_core::model::UnknownStatus;
use flow_core::repo::apply_mirror;
use flow_core::{ChildFlowRecord, Flow, FlowId, FlowQuery, FlowRepository, FlowStatus, FlowTransaction, FlowType,
                FlowWrite, RepositoryError, TenantScope};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{child_flows, master_flows};

/// Pool r2d2 de conexiones Postgres. Se construye con `min_idle` y
/// `max_size`; al construirlo se aplican las migraciones pendientes.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones (pool real o sustituto en tests).
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Fila de `master_flows`.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = master_flows, primary_key(flow_id), check_for_backend(diesel::pg::Pg))]
pub struct MasterRow {
    pub flow_id: Uuid,
    pub flow_type: String,
    pub flow_name: String,
    pub flow_status: String,
    pub current_phase: String,
    pub progress_percentage: f64,
    pub configuration: Value,
    pub persistence_data: Value,
    pub flow_metadata: Value,
    pub client_account_id: Uuid,
    pub engagement_id: Uuid,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: i64,
}

/// Fila de `child_flows`.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = child_flows, primary_key(flow_id), check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct ChildRow {
    pub flow_id: Uuid,
    pub master_flow_id: Option<Uuid>,
    pub flow_type: String,
    pub client_account_id: Uuid,
    pub engagement_id: Uuid,
    pub status: Option<String>,
    pub current_phase: Option<String>,
    pub progress_percentage: f64,
    pub data: Value,
    pub marked_for_deletion: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<Value, PersistenceError> {
    serde_json::to_value(value).map_err(|e| PersistenceError::InvalidRow(format!("{what}: {e}")))
}

fn parse_flow_type(raw: &str) -> Result<FlowType, PersistenceError> {
    raw.parse().map_err(|e: flow_core::OrchestratorError| PersistenceError::InvalidRow(e.to_string()))
}

impl MasterRow {
    pub fn from_flow(flow: &Flow) -> Result<Self, PersistenceError> {
        Ok(Self { flow_id: flow.flow_id.as_uuid(),
                  flow_type: flow.flow_type.as_str().to_string(),
                  flow_name: flow.flow_name.clone(),
                  flow_status: flow.flow_status.as_str().to_string(),
                  current_phase: flow.current_phase.clone(),
                  progress_percentage: flow.progress_percentage,
                  configuration: Value::Object(flow.configuration.clone()),
                  persistence_data: to_json(&flow.persistence_data, "persistence_data")?,
                  flow_metadata: to_json(&flow.flow_metadata, "flow_metadata")?,
                  client_account_id: flow.client_account_id,
                  engagement_id: flow.engagement_id,
                  created_by: flow.created_by.clone(),
                  created_at: flow.created_at,
                  updated_at: flow.updated_at,
                  revision: flow.revision })
    }

    pub fn into_flow(self) -> Result<Flow, PersistenceError> {
        let flow_status: FlowStatus =
            self.flow_status.parse().map_err(|e: UnknownStatus| PersistenceError::InvalidRow(e.to_string()))?;
        let configuration = match self.configuration {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(PersistenceError::InvalidRow(format!("configuration is not an object: {other}"))),
        };
        let persistence_data = serde_json::from_value(self.persistence_data)
            .map_err(|e| PersistenceError::InvalidRow(format!("persistence_data of {}: {e}", self.flow_id)))?;
        let mut persistence_data: flow_core::PersistenceData = persistence_data;
        // jsonb no conserva el orden de claves.
        persistence_data.phase_completion
                        .sort_by(|_, a, _, b| a.completed_at.cmp(&b.completed_at));
        let flow_metadata = serde_json::from_value(self.flow_metadata)
            .map_err(|e| PersistenceError::InvalidRow(format!("flow_metadata of {}: {e}", self.flow_id)))?;
        Ok(Flow { flow_id: FlowId::from_uuid(self.flow_id),
                  flow_type: parse_flow_type(&self.flow_type)?,
                  flow_name: self.flow_name,
                  flow_status,
                  current_phase: self.current_phase,
                  progress_percentage: self.progress_percentage,
                  configuration,
                  persistence_data,
                  flow_metadata,
                  client_account_id: self.client_account_id,
                  engagement_id: self.engagement_id,
                  created_by: self.created_by,
                  created_at: self.created_at,
                  updated_at: self.updated_at,
                  revision: self.revision })
    }
}

impl ChildRow {
    pub fn from_child(child: &ChildFlowRecord) -> Self {
        Self { flow_id: child.flow_id.as_uuid(),
               master_flow_id: child.master_flow_id.map(|id| id.as_uuid()),
               flow_type: child.flow_type.as_str().to_string(),
               client_account_id: child.client_account_id,
               engagement_id: child.engagement_id,
               status: child.status.clone(),
               current_phase: child.current_phase.clone(),
               progress_percentage: child.progress_percentage,
               data: child.data.clone(),
               marked_for_deletion: child.marked_for_deletion,
               created_at: child.created_at,
               updated_at: child.updated_at }
    }

    pub fn into_child(self) -> Result<ChildFlowRecord, PersistenceError> {
        Ok(ChildFlowRecord { flow_id: FlowId::from_uuid(self.flow_id),
                             master_flow_id: self.master_flow_id.map(FlowId::from_uuid),
                             flow_type: parse_flow_type(&self.flow_type)?,
                             client_account_id: self.client_account_id,
                             engagement_id: self.engagement_id,
                             status: self.status,
                             current_phase: self.current_phase,
                             progress_percentage: self.progress_percentage,
                             data: self.data,
                             marked_for_deletion: self.marked_for_deletion,
                             created_at: self.created_at,
                             updated_at: self.updated_at })
    }
}

/// Transitorio = conviene reintentar con backoff.
fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict | PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("connection closed")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Hasta 3 reintentos con backoff de 15ms, 30ms y 45ms.
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {e} -> sleeping {delay_ms}ms", attempts + 1);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn ensure_touched(rows: usize, what: impl FnOnce() -> String) -> Result<(), PersistenceError> {
    if rows == 0 {
        return Err(PersistenceError::NotFound(what()));
    }
    Ok(())
}

/// Aplica una escritura dentro de la transacción abierta.
fn apply_write(conn: &mut PgConnection, write: &FlowWrite) -> Result<(), PersistenceError> {
    match write {
        FlowWrite::InsertMaster(flow) => {
            diesel::insert_into(master_flows::table).values(&MasterRow::from_flow(flow)?)
                                                    .execute(conn)?;
        }
        FlowWrite::UpdateMaster { flow, expected_revision } => {
            let row = MasterRow::from_flow(flow)?;
            let updated = diesel::update(master_flows::table.find(row.flow_id)
                                                            .filter(master_flows::revision.eq(*expected_revision)))
                .set(&row)
                .execute(conn)?;
            if updated == 0 {
                let stored: Option<i64> = master_flows::table.find(row.flow_id)
                                                             .select(master_flows::revision)
                                                             .first(conn)
                                                             .optional()?;
                return Err(match stored {
                    Some(revision) => PersistenceError::RevisionConflict(format!("master {} is at revision {revision}, \
                                                                                  expected {expected_revision}",
                                                                                 flow.flow_id)),
                    None => PersistenceError::NotFound(format!("master {}", flow.flow_id)),
                });
            }
        }
        FlowWrite::DiscardMaster(flow_id) => {
            diesel::delete(master_flows::table.find(flow_id.as_uuid())).execute(conn)?;
        }
        FlowWrite::InsertChild(child) => {
            diesel::insert_into(child_flows::table).values(&ChildRow::from_child(child))
                                                   .execute(conn)?;
        }
        FlowWrite::MirrorChildStatus { master_flow_id,
                                       status,
                                       current_phase,
                                       progress_percentage, } => {
            let linked: Vec<ChildRow> = child_flows::table.filter(child_flows::master_flow_id.eq(master_flow_id.as_uuid()))
                                                          .select(ChildRow::as_select())
                                                          .for_update()
                                                          .load(conn)?;
            for row in linked {
                let mut child = row.into_child()?;
                apply_mirror(&mut child, *status, current_phase, *progress_percentage);
                let row = ChildRow::from_child(&child);
                diesel::update(child_flows::table.find(row.flow_id)).set(&row).execute(conn)?;
            }
        }
        FlowWrite::LinkChild { flow_id, master_flow_id } => {
            let updated = diesel::update(child_flows::table.find(flow_id.as_uuid()))
                .set((child_flows::master_flow_id.eq(Some(master_flow_id.as_uuid())),
                      child_flows::updated_at.eq(Utc::now())))
                .execute(conn)?;
            ensure_touched(updated, || format!("child {flow_id}"))?;
        }
        FlowWrite::MarkChildForDeletion { flow_id } => {
            let updated = diesel::update(child_flows::table.find(flow_id.as_uuid()))
                .set((child_flows::marked_for_deletion.eq(true), child_flows::updated_at.eq(Utc::now())))
                .execute(conn)?;
            ensure_touched(updated, || format!("child {flow_id}"))?;
        }
        FlowWrite::DiscardChild(flow_id) => {
            diesel::delete(child_flows::table.find(flow_id.as_uuid())).execute(conn)?;
        }
    }
    Ok(())
}

fn rows_into_children(rows: Vec<ChildRow>) -> Result<Vec<ChildFlowRecord>, PersistenceError> {
    rows.into_iter().map(ChildRow::into_child).collect()
}

/// Repositorio Postgres de masters y children.
pub struct PgFlowRepository<P: ConnectionProvider = PoolProvider> {
    provider: Arc<P>,
}

impl PgFlowRepository<PoolProvider> {
    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(PoolProvider { pool })
    }
}

impl<P: ConnectionProvider> PgFlowRepository<P> {
    pub fn new(provider: P) -> Self {
        Self { provider: Arc::new(provider) }
    }

    /// Ejecuta `f` en el pool de hilos bloqueantes de tokio.
    async fn blocking<F, T>(&self, op: &'static str, f: F) -> Result<T, RepositoryError>
        where F: FnOnce(&P) -> Result<T, PersistenceError> + Send + 'static,
              T: Send + 'static
    {
        let provider = Arc::clone(&self.provider);
        match tokio::task::spawn_blocking(move || f(provider.as_ref())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!("{op}:failed err={e}");
                Err(e.into())
            }
            Err(e) => Err(RepositoryError::Internal(format!("{op}: blocking task failed: {e}"))),
        }
    }
}

#[async_trait]
impl<P: ConnectionProvider> FlowRepository for PgFlowRepository<P> {
    async fn get_by_flow_id(&self, scope: &TenantScope, flow_id: FlowId) -> Result<Option<Flow>, RepositoryError> {
        let scope = *scope;
        self.blocking("get_by_flow_id", move |provider| {
                let row: Option<MasterRow> = with_retry(|| {
                    let mut conn = provider.connection()?;
                    master_flows::table.find(flow_id.as_uuid())
                                       .filter(master_flows::client_account_id.eq(scope.client_account_id))
                                       .filter(master_flows::engagement_id.eq(scope.engagement_id))
                                       .select(MasterRow::as_select())
                                       .first(&mut conn)
                                       .optional()
                                       .map_err(PersistenceError::from)
                })?;
                row.map(MasterRow::into_flow).transpose()
            })
            .await
    }

    async fn list_flows(&self, query: &FlowQuery) -> Result<Vec<Flow>, RepositoryError> {
        let query = query.clone();
        self.blocking("list_flows", move |provider| {
                let rows: Vec<MasterRow> = with_retry(|| {
                    let mut conn = provider.connection()?;
                    let mut select = master_flows::table.filter(master_flows::client_account_id.eq(query.client_account_id))
                                                        .select(MasterRow::as_select())
                                                        .into_boxed();
                    if let Some(engagement_id) = query.engagement_id {
                        select = select.filter(master_flows::engagement_id.eq(engagement_id));
                    }
                    if let Some(flow_type) = query.flow_type {
                        select = select.filter(master_flows::flow_type.eq(flow_type.as_str()));
                    }
                    if !query.include_deleted {
                        select = select.filter(master_flows::flow_status.ne(FlowStatus::Deleted.as_str()));
                    }
                    if let Some(statuses) = &query.statuses {
                        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
                        select = select.filter(master_flows::flow_status.eq_any(names));
                    }
                    select.order(master_flows::updated_at.desc())
                          .limit(clamp_limit(query.limit))
                          .load(&mut conn)
                          .map_err(PersistenceError::from)
                })?;
                debug!("list_flows:done count={}", rows.len());
                rows.into_iter().map(MasterRow::into_flow).collect()
            })
            .await
    }

    async fn get_child(&self, scope: &TenantScope, flow_id: FlowId) -> Result<Option<ChildFlowRecord>, RepositoryError> {
        let scope = *scope;
        self.blocking("get_child", move |provider| {
                let row: Option<ChildRow> = with_retry(|| {
                    let mut conn = provider.connection()?;
                    child_flows::table.find(flow_id.as_uuid())
                                      .filter(child_flows::client_account_id.eq(scope.client_account_id))
                                      .filter(child_flows::engagement_id.eq(scope.engagement_id))
                                      .select(ChildRow::as_select())
                                      .first(&mut conn)
                                      .optional()
                                      .map_err(PersistenceError::from)
                })?;
                row.map(ChildRow::into_child).transpose()
            })
            .await
    }

    async fn find_related_children(&self,
                                   scope: &TenantScope,
                                   flow_id: FlowId)
                                   -> Result<Vec<ChildFlowRecord>, RepositoryError> {
        let scope = *scope;
        let id = flow_id.as_uuid();
        self.blocking("find_related_children", move |provider| {
                let rows: Vec<ChildRow> = with_retry(|| {
                    let mut conn = provider.connection()?;
                    child_flows::table.filter(child_flows::client_account_id.eq(scope.client_account_id))
                                      .filter(child_flows::engagement_id.eq(scope.engagement_id))
                                      .filter(child_flows::flow_id.nullable()
                                                                  .eq(Some(id))
                                                                  .or(child_flows::master_flow_id.eq(Some(id))))
                                      .select(ChildRow::as_select())
                                      .load(&mut conn)
                                      .map_err(PersistenceError::from)
                })?;
                rows_into_children(rows)
            })
            .await
    }

    async fn list_children(&self, scope: &TenantScope) -> Result<Vec<ChildFlowRecord>, RepositoryError> {
        let scope = *scope;
        self.blocking("list_children", move |provider| {
                let rows: Vec<ChildRow> = with_retry(|| {
                    let mut conn = provider.connection()?;
                    child_flows::table.filter(child_flows::client_account_id.eq(scope.client_account_id))
                                      .filter(child_flows::engagement_id.eq(scope.engagement_id))
                                      .order(child_flows::created_at.asc())
                                      .select(ChildRow::as_select())
                                      .load(&mut conn)
                                      .map_err(PersistenceError::from)
                })?;
                rows_into_children(rows)
            })
            .await
    }

    async fn commit(&self, tx: FlowTransaction) -> Result<(), RepositoryError> {
        if tx.is_empty() {
            return Ok(());
        }
        let writes = tx.into_writes();
        self.blocking("commit", move |provider| {
                debug!("commit:start writes={}", writes.len());
                with_retry(|| {
                    let mut conn = provider.connection()?;
                    conn.build_transaction().read_write().run(|tx_conn| {
                                                             for write in &writes {
                                                                 apply_write(tx_conn, write).map_err(|e| {
                                                                     warn!("commit:aborted write={} err={e}", write.kind());
                                                                     e
                                                                 })?;
                                                             }
                                                             Ok::<(), PersistenceError>(())
                                                         })
                })
            })
            .await
    }
}

/// Construye un pool r2d2 y aplica las migraciones pendientes.
///
/// Si `min_size > max_size` se usa `min = max`; un tamaño 0 se trata como 1.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    if validated_min > validated_max {
        warn!("build_pool: min_size > max_size ({validated_min} > {validated_max}), using min=max");
    }
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(validated_min.min(validated_max)))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Carga `.env`, lee `DbConfig` y construye un pool ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
