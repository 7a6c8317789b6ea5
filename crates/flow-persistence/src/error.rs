//! Errores de persistencia.
//! Mapea errores de Diesel y del pool a variantes semánticas, y éstas a
//! `RepositoryError` del core.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

use flow_core::RepositoryError;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Otra escritura actualizó el master desde que se leyó.
    #[error("revision conflict: {0}")]
    RevisionConflict(String),
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    /// Fila que no se puede convertir al modelo (tipo o estado desconocido,
    /// JSON inválido).
    #[error("invalid row: {0}")]
    InvalidRow(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound("row".into()),
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {other:?}: {}", info.message())),
            },
            DieselError::DeserializationError(e) => Self::InvalidRow(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Unknown(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            DieselError::RollbackErrorOnCommit { rollback_error, commit_error } => {
                Self::Unknown(format!("rollback={rollback_error}; commit={commit_error}"))
            }
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<PersistenceError> for RepositoryError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound(what) => RepositoryError::NotFound(what),
            PersistenceError::UniqueViolation(msg) | PersistenceError::RevisionConflict(msg) => {
                RepositoryError::Conflict(msg)
            }
            PersistenceError::SerializationConflict | PersistenceError::TransientIo(_) => {
                RepositoryError::Transient(err.to_string())
            }
            other => RepositoryError::Internal(other.to_string()),
        }
    }
}
