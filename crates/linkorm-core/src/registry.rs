//! Explicit model registry.
//!
//! Dynamic callers that only know a table name resolve the model through a
//! registry they own instead of ambient global state.

use crate::Result;
use crate::error::RegistryError;
use crate::model::{Model, ModelType};
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct ModelRegistry {
    by_table: HashMap<String, ModelType>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `M` under its table name, replacing a previous registration.
    pub fn register<M: Model>(&mut self) -> &mut Self {
        let model = ModelType::of::<M>();
        if let Some(previous) = self.by_table.insert(model.table.to_lowercase(), model) {
            if previous != model {
                tracing::warn!(
                    table = model.table,
                    previous = previous.type_name,
                    model = model.type_name,
                    "Table re-registered with a different model"
                );
            }
        }
        self
    }

    /// Look a model up by table name (case-insensitive).
    #[allow(clippy::result_large_err)]
    pub fn lookup(&self, table: &str) -> Result<ModelType> {
        self.get(table).ok_or_else(|| {
            RegistryError::NotFound {
                table: table.to_string(),
            }
            .into()
        })
    }

    pub fn get(&self, table: &str) -> Option<ModelType> {
        self.by_table.get(&table.to_lowercase()).copied()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.get(table).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_table.is_empty()
    }

    pub fn models(&self) -> impl Iterator<Item = ModelType> + '_ {
        self.by_table.values().copied()
    }
}
