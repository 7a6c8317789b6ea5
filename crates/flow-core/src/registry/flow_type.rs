//! Catálogo cerrado de tipos de flujo.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Discovery,
    Assessment,
    Planning,
    Execution,
    Modernize,
    Decommission,
}

impl FlowType {
    pub const ALL: [FlowType; 6] = [FlowType::Discovery,
                                    FlowType::Assessment,
                                    FlowType::Planning,
                                    FlowType::Execution,
                                    FlowType::Modernize,
                                    FlowType::Decommission];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::Discovery => "discovery",
            FlowType::Assessment => "assessment",
            FlowType::Planning => "planning",
            FlowType::Execution => "execution",
            FlowType::Modernize => "modernize",
            FlowType::Decommission => "decommission",
        }
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        FlowType::ALL.into_iter()
                     .find(|t| t.as_str() == wanted)
                     .ok_or_else(|| OrchestratorError::InvalidFlowType(s.to_string()))
    }
}
