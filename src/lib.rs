//! # Taxis
//!
//! *τάξις, Ancient Greek for "arrangement" or "order".*
//!
//! Taxis sits between a REST collection API and a relational database. It
//! does two things:
//!
//! ### Query parameters to query plans
//! A flat map of request parameters (`firstName`, `age:gte`,
//! `pets.name:like`, `eager`, `scope`, `order`, `range`, `pick`, ...) is
//! compiled against registered model metadata into a [`QueryPlan`]:
//! conditions, joins, eager expression, ordering and pagination. Every
//! reference is resolved through the model's relations, checked against an
//! optional allow-list and coerced to the property's type.
//!
//! ```rust,ignore
//! use serde_json::json;
//! use taxis::{Engine, Schema, adapters::postgres::PostgresAdapter};
//!
//! let schema = Schema::from_json(include_str!("models.json"))?;
//! let engine = Engine::new(schema, Box::new(PostgresAdapter::from_pool(pool)));
//!
//! let params = json!({ "lastName": "Doe", "pets.name:like": "Fl%", "eager": "pets" });
//! let page = engine.find("Person", params.as_object().unwrap(), &[]).await?;
//! ```
//!
//! ### Nested graph writes
//! A nested JSON payload is prepared for an insert/upsert/patch of the whole
//! object graph: per-relation graph options become per-path overrides,
//! nodes that should only be related are reduced to their identity, and the
//! stripped data is put back onto the write result so the caller gets back
//! what it sent.
//!
//! ```rust,ignore
//! let written = engine
//!     .write_graph("Person", payload, GraphWriteMode::Upsert, &GraphOptions::new())
//!     .await?;
//! ```
//!
//! ## Feature flags
//!
//! | Flag       | Default | Description                 |
//! |------------|---------|-----------------------------|
//! | `postgres` | ✓       | PostgreSQL executor via sqlx |
//!

pub mod adapters;
pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod query;

use metrics::histogram;
use serde::Serialize;
use serde_json::Value;

use std::sync::Arc;
use std::time::Instant;

pub use crate::adapters::{GraphWriter, QueryExecutor, Statement};
use crate::adapters::{eager, render_count, render_select};
pub use crate::config::{Dialect, GraphSettings, Settings};
pub use crate::error::{Error, QueryError, QueryErrorKind};
pub use crate::graph::{GraphOption, GraphOptions, GraphProcessor, GraphWriteMode, WriteOptions};
pub use crate::model::*;
pub use crate::query::{
    FilterRegistry, HandlerRegistry, QueryBuilder, QueryContext, QueryParams, QueryPlan,
};

/// One page of results. `total` is reported for `range` queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FindResult {
    pub results: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// The Engine compiles request parameters against the schema and runs them
/// through the configured executor, and prepares graph writes for the
/// configured writer.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Taxis>,
}

pub struct Taxis {
    schema: Schema,
    settings: Settings,
    filters: FilterRegistry,
    handlers: HandlerRegistry,
    executor: Box<dyn QueryExecutor>,
    writer: Option<Box<dyn GraphWriter>>,
}

pub struct EngineBuilder {
    schema: Schema,
    settings: Settings,
    filters: FilterRegistry,
    handlers: HandlerRegistry,
    executor: Box<dyn QueryExecutor>,
    writer: Option<Box<dyn GraphWriter>>,
}

impl EngineBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn writer(mut self, writer: Box<dyn GraphWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(Taxis {
                schema: self.schema,
                settings: self.settings,
                filters: self.filters,
                handlers: self.handlers,
                executor: self.executor,
                writer: self.writer,
            }),
        }
    }
}

impl Engine {
    pub fn new(schema: Schema, executor: Box<dyn QueryExecutor>) -> Self {
        Self::builder(schema, executor).build()
    }

    pub fn builder(schema: Schema, executor: Box<dyn QueryExecutor>) -> EngineBuilder {
        EngineBuilder {
            schema,
            settings: Settings::default(),
            filters: FilterRegistry::new(),
            handlers: HandlerRegistry::new(),
            executor,
            writer: None,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn context(&self) -> QueryContext<'_> {
        QueryContext::new(&self.inner.schema)
            .settings(&self.inner.settings)
            .filters(&self.inner.filters)
            .handlers(&self.inner.handlers)
    }

    // ==================== Queries ====================

    /// Start a query on `model` for hand-built plans.
    pub fn query(&self, model: &str) -> Result<QueryBuilder<'_>, Error> {
        QueryBuilder::with_context(self.context(), model)
    }

    /// Compile request parameters into a plan without running it.
    pub fn compile(
        &self,
        model: &str,
        params: &QueryParams,
        allow_filter: &[&str],
    ) -> Result<QueryPlan, Error> {
        QueryBuilder::build(self.context(), model, params, allow_filter)
    }

    /// Compile and run request parameters. `allow_filter` restricts the
    /// filterable references when non-empty.
    #[tracing::instrument(skip_all, fields(model = %model))]
    pub async fn find(
        &self,
        model: &str,
        params: &QueryParams,
        allow_filter: &[&str],
    ) -> Result<FindResult, Error> {
        let plan = self.compile(model, params, allow_filter)?;
        self.execute(&plan).await
    }

    /// Run a finalized plan: the main select, eager relations and, for
    /// `range` pagination, the total count.
    pub async fn execute(&self, plan: &QueryPlan) -> Result<FindResult, Error> {
        let start = Instant::now();
        let schema = &self.inner.schema;
        let dialect = self.inner.settings.dialect;
        let model = schema.require(&plan.model)?;

        // Eager relations are keyed on root columns that a projection may
        // have dropped; select them and strip them again afterwards.
        let mut added = Vec::new();
        let statement = match (&plan.columns, &plan.eager) {
            (Some(columns), Some(eager)) => {
                let mut render = plan.clone();
                let mut columns = columns.clone();
                for column in eager::key_columns(model, &eager.children) {
                    if !columns.contains(&column) {
                        columns.push(column.clone());
                        added.push(column);
                    }
                }
                render.columns = Some(columns);
                render_select(schema, dialect, &render)?
            }
            _ => render_select(schema, dialect, plan)?,
        };

        let mut results = self.inner.executor.fetch(&statement).await?;

        if let Some(eager) = plan.eager.as_ref().filter(|eager| !eager.is_empty()) {
            eager::load_relations(
                self.inner.executor.as_ref(),
                self.context(),
                model,
                &mut results,
                &eager.children,
            )
            .await?;
        }

        if !added.is_empty() || !plan.selects.is_empty() {
            for row in results.iter_mut() {
                if let Some(object) = row.as_object_mut() {
                    for column in &added {
                        object.remove(column);
                    }
                    for select in &plan.selects {
                        object.remove(&select.alias);
                    }
                }
            }
        }

        let total = match plan.pagination {
            Some(pagination) if pagination.wants_total() => {
                let statement = render_count(schema, dialect, plan)?;
                Some(self.inner.executor.fetch_count(&statement).await?)
            }
            _ => None,
        };

        histogram!("taxis.query.duration_ms",
            "model" => plan.model.clone()
        )
        .record(start.elapsed().as_millis() as f64);

        Ok(FindResult { results, total })
    }

    /// Like [`Engine::find`], deserializing rows into `T`.
    pub async fn find_entities<T: Entity>(
        &self,
        params: &QueryParams,
        allow_filter: &[&str],
    ) -> Result<Vec<T>, Error> {
        let page = self.find(T::MODEL, params, allow_filter).await?;
        page.results.into_iter().map(T::from_row).collect()
    }

    /// Number of rows the filters in `params` match. Pagination, eager and
    /// ordering parameters are accepted and ignored.
    pub async fn count(
        &self,
        model: &str,
        params: &QueryParams,
        allow_filter: &[&str],
    ) -> Result<u64, Error> {
        let start = Instant::now();
        let mut builder = self.query(model)?;
        builder.allow_filter(allow_filter.iter().copied())?;
        builder.find(params)?;
        builder.count();
        let plan = builder.finalize()?;

        let statement = render_count(&self.inner.schema, self.inner.settings.dialect, &plan)?;
        let count = self.inner.executor.fetch_count(&statement).await?;

        histogram!("taxis.count.duration_ms",
            "model" => model.to_string()
        )
        .record(start.elapsed().as_millis() as f64);
        Ok(count)
    }

    // ==================== Graph writes ====================

    /// Prepare `data` for a graph write of `model`, hand it to the writer and
    /// return the writer's result with stripped relations restored.
    ///
    /// `options` are merged on top of the mode's defaults.
    #[tracing::instrument(skip_all, fields(model = %model, mode = ?mode))]
    pub async fn write_graph(
        &self,
        model: &str,
        data: Value,
        mode: GraphWriteMode,
        options: &GraphOptions,
    ) -> Result<Value, Error> {
        let writer = self
            .inner
            .writer
            .as_ref()
            .ok_or_else(|| Error::Storage("No graph writer configured".to_string()))?;

        let start = Instant::now();
        let schema = &self.inner.schema;
        let definition = schema.require(model)?;
        let options = GraphOptions::merge(&mode.default_options(), options);

        let processor =
            GraphProcessor::process(schema, model, &data, options, self.inner.settings.graph)?;
        let result = writer
            .write_graph(
                schema,
                definition,
                mode,
                processor.data(),
                &processor.options(),
            )
            .await?;
        let result = processor.restore_relations(result);

        histogram!("taxis.graph_write.duration_ms",
            "model" => model.to_string()
        )
        .record(start.elapsed().as_millis() as f64);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::adapters::memory::MemoryAdapter;

    fn schema() -> Schema {
        Schema::from_json(
            r#"{
                "Person": {
                    "table": "people",
                    "properties": { "name": "string", "age": "integer" },
                    "relations": {
                        "pets": { "relation": "hasMany", "model": "Animal", "from": "id", "to": "ownerId" }
                    }
                },
                "Animal": {
                    "table": "animals",
                    "properties": { "name": "string", "ownerId": "integer" }
                }
            }"#,
        )
        .unwrap()
    }

    fn params(value: Value) -> QueryParams {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn find_loads_eager_relations() {
        let adapter = MemoryAdapter::new()
            .with_rows("Person", vec![json!({ "id": 1, "name": "Jen" })])
            .with_rows(
                "Animal",
                vec![
                    json!({ "id": 10, "name": "Fluffy", "ownerId": 1 }),
                    json!({ "id": 11, "name": "Stray", "ownerId": 2 }),
                ],
            );
        let engine = Engine::new(schema(), Box::new(adapter.clone()));

        let page = engine
            .find("Person", &params(json!({ "eager": "pets" })), &[])
            .await
            .unwrap();

        assert_eq!(
            page.results,
            vec![json!({
                "id": 1,
                "name": "Jen",
                "pets": [{ "id": 10, "name": "Fluffy", "ownerId": 1 }]
            })]
        );
        assert_eq!(page.total, None);
        assert_eq!(adapter.statements().len(), 2);
    }

    #[tokio::test]
    async fn range_reports_total() {
        let adapter = MemoryAdapter::new().with_rows(
            "Person",
            vec![json!({ "id": 1, "name": "Jen" }), json!({ "id": 2, "name": "Sam" })],
        );
        let engine = Engine::new(schema(), Box::new(adapter));

        let page = engine
            .find("Person", &params(json!({ "range": "0,9" })), &[])
            .await
            .unwrap();
        assert_eq!(page.total, Some(2));
    }

    #[tokio::test]
    async fn write_graph_without_writer_fails() {
        let engine = Engine::new(schema(), Box::new(MemoryAdapter::new()));
        let err = engine
            .write_graph("Person", json!({ "name": "Jen" }), GraphWriteMode::Insert, &GraphOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn compile_rejects_unknown_model() {
        let engine = Engine::new(schema(), Box::new(MemoryAdapter::new()));
        let err = engine.compile("Nope", &QueryParams::new(), &[]).unwrap_err();
        assert!(matches!(err, Error::UnknownModel(_)));
    }
}
