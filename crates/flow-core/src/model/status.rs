//! Estado de un flujo en el registro master.
//!
//! Transiciones relevantes:
//! - `Initializing` -> `Running` (creación)
//! - `Running` <-> `Paused`, `WaitingForApproval` -> `Running` (resume)
//! - cualquier estado no terminal -> `Completed` / `Cancelled`
//! - cualquier estado -> `Deleted` (soft delete, terminal)
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Initializing,
    Running,
    Paused,
    WaitingForApproval,
    Completed,
    Cancelled,
    Deleted,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown flow status: {0}")]
pub struct UnknownStatus(pub String);

impl FlowStatus {
    pub const ALL: [FlowStatus; 7] = [FlowStatus::Initializing,
                                      FlowStatus::Running,
                                      FlowStatus::Paused,
                                      FlowStatus::WaitingForApproval,
                                      FlowStatus::Completed,
                                      FlowStatus::Cancelled,
                                      FlowStatus::Deleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Initializing => "initializing",
            FlowStatus::Running => "running",
            FlowStatus::Paused => "paused",
            FlowStatus::WaitingForApproval => "waiting_for_approval",
            FlowStatus::Completed => "completed",
            FlowStatus::Cancelled => "cancelled",
            FlowStatus::Deleted => "deleted",
        }
    }

    /// Estados en los que ya no se ejecutan fases.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowStatus::Completed | FlowStatus::Cancelled | FlowStatus::Deleted)
    }

    /// Estados desde los que `resume_flow` puede continuar.
    pub fn is_resumable(&self) -> bool {
        matches!(self,
                 FlowStatus::Paused | FlowStatus::WaitingForApproval | FlowStatus::Initializing | FlowStatus::Running)
    }

    /// Estados considerados "activos" para listados.
    pub fn is_active(&self) -> bool {
        matches!(self,
                 FlowStatus::Initializing | FlowStatus::Running | FlowStatus::Paused | FlowStatus::WaitingForApproval)
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = UnknownStatus;

    /// Acepta además los alias heredados de las tablas child
    /// (`initialized`, `processing`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "initializing" | "initialized" => Ok(FlowStatus::Initializing),
            "running" | "processing" => Ok(FlowStatus::Running),
            "paused" => Ok(FlowStatus::Paused),
            "waiting_for_approval" => Ok(FlowStatus::WaitingForApproval),
            "completed" => Ok(FlowStatus::Completed),
            "cancelled" => Ok(FlowStatus::Cancelled),
            "deleted" => Ok(FlowStatus::Deleted),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_aliases_parse_to_resumable_states() {
        assert_eq!("initialized".parse::<FlowStatus>(), Ok(FlowStatus::Initializing));
        assert_eq!("PROCESSING".parse::<FlowStatus>(), Ok(FlowStatus::Running));
        assert!("initialized".parse::<FlowStatus>().map(|s| s.is_resumable()).unwrap_or(false));
        assert!("exploded".parse::<FlowStatus>().is_err());
    }

    #[test]
    fn string_form_round_trips_for_every_variant() {
        for status in FlowStatus::ALL {
            assert_eq!(status.as_str().parse::<FlowStatus>(), Ok(status));
        }
    }

    #[test]
    fn terminal_states_are_not_resumable() {
        for status in [FlowStatus::Completed, FlowStatus::Cancelled, FlowStatus::Deleted] {
            assert!(status.is_terminal());
            assert!(!status.is_resumable());
        }
    }
}
