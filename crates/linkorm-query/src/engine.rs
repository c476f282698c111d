//! The engine: configuration plus the model registry, handing out builders.

use crate::builder::{DeleteBuilder, InsertBuilder, UpdateBuilder};
use crate::loader::LevelReport;
use crate::plan::Planner;
use crate::preload::{PreloadSpec, StrategyHint, run_plan};
use crate::select::{QuerySpec, Select};
use asupersync::{Cx, Outcome};
use linkorm_core::{
    Connection, EngineConfig, Error, Model, ModelRegistry, ModelType, Record, Result,
};

/// Entry point for building statements and loading relations.
///
/// Holds no connection; every call takes the caller's `Cx` and connection.
///
/// # Example
///
/// ```ignore
/// let mut engine = Engine::new(EngineConfig::default());
/// engine.register::<Post>();
///
/// let posts = engine
///     .select::<Post>()
///     .filter("published = ?", params![true])
///     .preload_relation("author")
///     .preload_relation("comments")
///     .all(&cx, &conn)
///     .await;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
    registry: ModelRegistry,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: ModelRegistry::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModelRegistry {
        &mut self.registry
    }

    pub fn register<M: Model>(&mut self) -> &mut Self {
        self.registry.register::<M>();
        self
    }

    /// A typed SELECT carrying the engine configuration.
    pub fn select<M: Model>(&self) -> Select<M> {
        Select::new().with_config(self.config)
    }

    /// A dynamic SELECT on a registered table.
    #[allow(clippy::result_large_err)]
    pub fn table(&self, name: &str) -> Result<QuerySpec> {
        let model: ModelType = self.registry.lookup(name)?;
        Ok(QuerySpec::new()
            .table(name)
            .model_type(model)
            .with_config(self.config))
    }

    pub fn insert<M: Model>(&self) -> InsertBuilder {
        let builder = InsertBuilder::for_model::<M>();
        match self.config.dialect {
            Some(dialect) => builder.with_dialect(dialect),
            None => builder,
        }
    }

    pub fn update<M: Model>(&self) -> UpdateBuilder {
        let builder = UpdateBuilder::for_model::<M>();
        match self.config.dialect {
            Some(dialect) => builder.with_dialect(dialect),
            None => builder,
        }
    }

    pub fn delete<M: Model>(&self) -> DeleteBuilder {
        let builder = DeleteBuilder::for_model::<M>();
        match self.config.dialect {
            Some(dialect) => builder.with_dialect(dialect),
            None => builder,
        }
    }

    /// Load a relation path onto records that are already in memory, with
    /// batched statements only.
    #[tracing::instrument(level = "debug", skip(self, cx, conn, records))]
    pub async fn load_relations<M: Model, C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        records: &mut [M],
        path: &str,
    ) -> Outcome<Vec<(String, LevelReport)>, Error> {
        let spec = PreloadSpec::new(path).hint(StrategyHint::ForceSeparate);
        let plan = match Planner::new(self.config.identifier_budget).plan(ModelType::of::<M>(), &[spec]) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        let dialect = self.config.dialect_or(conn.dialect());
        let mut roots: Vec<&mut dyn Record> = records.iter_mut().map(|m| m as &mut dyn Record).collect();
        run_plan(cx, conn, &mut roots, &plan, &self.config, dialect).await
    }
}
