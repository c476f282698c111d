//! Engine configuration.

use crate::Result;
use crate::dialect::Dialect;
use crate::error::{ConfigErrorKind, Error};
use serde::Deserialize;

/// Identifier length limit and the room kept for generated column suffixes.
///
/// A join alias chain fits when `chain.len() + margin <= limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IdentifierBudget {
    pub limit: usize,
    pub margin: usize,
}

impl IdentifierBudget {
    pub const DEFAULT_LIMIT: usize = 63;
    pub const DEFAULT_MARGIN: usize = 35;

    pub const fn new(limit: usize, margin: usize) -> Self {
        Self { limit, margin }
    }

    pub const fn for_dialect(dialect: Dialect) -> Self {
        Self::new(dialect.max_identifier_len(), Self::DEFAULT_MARGIN)
    }

    /// Does an alias chain of `len` characters overflow the budget?
    pub const fn exceeded_by(&self, len: usize) -> bool {
        len + self.margin > self.limit
    }
}

impl Default for IdentifierBudget {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT, Self::DEFAULT_MARGIN)
    }
}

/// What happens when one relation fails to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Log a warning, leave the relation unset and keep going.
    #[default]
    BestEffort,
    /// Fail the whole call.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub identifier_budget: IdentifierBudget,
    pub load_mode: LoadMode,
    /// Overrides the dialect reported by the connection.
    pub dialect: Option<Dialect>,
}

impl EngineConfig {
    /// Parse a JSON configuration document; missing keys take defaults.
    #[allow(clippy::result_large_err)]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::config(
                ConfigErrorKind::InvalidConfig,
                format!("invalid engine configuration: {}", e),
            )
        })
    }

    pub fn strict(mut self) -> Self {
        self.load_mode = LoadMode::Strict;
        self
    }

    pub fn with_budget(mut self, budget: IdentifierBudget) -> Self {
        self.identifier_budget = budget;
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Dialect to render with, given what the connection reports.
    pub fn dialect_or(&self, connection: Dialect) -> Dialect {
        self.dialect.unwrap_or(connection)
    }
}
