//! Identificadores y contexto de tenant.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::SYSTEM_ACTOR;

/// Identificador opaco de un flujo, visible para el llamador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(Uuid);

impl FlowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FlowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for FlowId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Alcance de tenant usado por todas las consultas del repositorio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantScope {
    pub client_account_id: Uuid,
    pub engagement_id: Uuid,
}

impl TenantScope {
    pub fn new(client_account_id: Uuid, engagement_id: Uuid) -> Self {
        Self { client_account_id,
               engagement_id }
    }

    /// `true` si el registro (client, engagement) pertenece a este alcance.
    pub fn contains(&self, client_account_id: Uuid, engagement_id: Uuid) -> bool {
        self.client_account_id == client_account_id && self.engagement_id == engagement_id
    }
}

/// Contexto de la petición: tenant + actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub client_account_id: Uuid,
    pub engagement_id: Uuid,
    pub user_id: Option<String>,
}

impl TenantContext {
    pub fn new(client_account_id: Uuid, engagement_id: Uuid) -> Self {
        Self { client_account_id,
               engagement_id,
               user_id: None }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn scope(&self) -> TenantScope {
        TenantScope::new(self.client_account_id, self.engagement_id)
    }

    /// Actor que firma auditoría y transiciones.
    pub fn actor(&self) -> &str {
        self.user_id.as_deref().unwrap_or(SYSTEM_ACTOR)
    }
}
