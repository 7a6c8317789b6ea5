//! Constantes del orquestador.
//!
//! Valores estáticos compartidos por el core y los crates que lo consumen.
//! `PERSISTENCE_DATA_VERSION` forma parte del blob persistido: incrementarla
//! sólo ante cambios incompatibles en `PersistenceData`.

/// Versión lógica del orquestador (se adjunta a los eventos de auditoría).
pub const ORCHESTRATOR_VERSION: &str = "MFO-1.0";

/// Versión del esquema de `persistence_data`.
pub const PERSISTENCE_DATA_VERSION: u32 = 1;

/// Fase inicial obligatoria de todo tipo de flujo.
pub const INITIALIZATION_PHASE: &str = "initialization";

/// Actor por defecto cuando el contexto no trae usuario.
pub const SYSTEM_ACTOR: &str = "system";

/// Intentos de una escritura read-modify-write del master ante `Conflict`.
pub const MAX_WRITE_ATTEMPTS: usize = 5;
