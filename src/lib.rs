//! MasterFlow
//!
//! Crate raíz del orquestador de flujos:
//! - `config` lee el entorno (.env) y produce `OrchestratorConfig`.
//! - `runtime` ensambla `MasterFlowOrchestrator` con el catálogo estándar y
//!   el backend elegido (memoria o Postgres con `pg_demo`).
//!
//! El núcleo vive en `crates/*`; aquí sólo hay cableado.

pub mod config;
pub mod runtime;

pub use config::{AppConfig, CONFIG};
pub use runtime::{build_orchestrator, in_memory_orchestrator, tenant_context, RuntimeError};
