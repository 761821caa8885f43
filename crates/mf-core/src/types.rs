//! Common data types for marginal-force

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Role of a row inside a matched-pairs table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Treated unit (indicator == 1).
    Treated,
    /// Matched control unit (indicator == 0).
    Control,
}

impl Role {
    /// Label used when the role is materialized as a string column.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Treated => "Treated",
            Role::Control => "Control",
        }
    }

    /// Parse a role label written by [`Role::as_str`].
    pub fn parse(label: &str) -> Result<Self> {
        match label {
            "Treated" => Ok(Role::Treated),
            "Control" => Ok(Role::Control),
            other => Err(Error::Validation(format!("unknown role label '{}'", other))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
