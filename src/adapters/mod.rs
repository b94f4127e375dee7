#[cfg(feature = "postgres")]
pub mod postgres;

pub mod eager;
pub mod memory;
pub mod sql;

pub use sql::*;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::graph::{GraphWriteMode, WriteOptions};
use crate::model::{ModelDefinition, Schema};

/// -----------------------------
/// Adapter contract
/// -----------------------------

/// Runs rendered statements. Rows come back as JSON objects keyed by column.
#[async_trait]
pub trait QueryExecutor: Send + Sync + 'static {
    async fn fetch(&self, statement: &Statement) -> Result<Vec<Value>, Error>;

    /// Runs a statement rendered by [`render_count`].
    async fn fetch_count(&self, statement: &Statement) -> Result<u64, Error>;
}

/// Persists a processed graph. `options` tells, per option, whether it is
/// enabled and for which relation paths; the result must mirror the shape of
/// `data` so stripped relations can be restored onto it.
#[async_trait]
pub trait GraphWriter: Send + Sync + 'static {
    async fn write_graph(
        &self,
        schema: &Schema,
        model: &ModelDefinition,
        mode: GraphWriteMode,
        data: Value,
        options: &WriteOptions,
    ) -> Result<Value, Error>;
}
