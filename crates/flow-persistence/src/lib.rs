//! flow-persistence
//!
//! Backend Postgres (Diesel + r2d2) de `FlowRepository`: tablas master y
//! child, commit transaccional de `FlowTransaction`, migraciones embebidas y
//! configuración desde `.env`.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgFlowRepository, PgPool, PoolProvider};
