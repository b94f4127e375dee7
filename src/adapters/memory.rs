use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::adapters::{GraphWriter, QueryExecutor, Statement};
use crate::error::Error;
use crate::graph::{EntityNode, GraphValue, GraphWriteMode, WriteOptions};
use crate::model::{ModelDefinition, Schema};

/// A graph write as received by the [`MemoryAdapter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphWrite {
    pub model: String,
    pub mode: GraphWriteMode,
    pub data: Value,
    pub options: WriteOptions,
}

#[derive(Debug, Default)]
struct MemoryStore {
    rows: HashMap<String, Vec<Value>>,
    statements: Vec<Statement>,
    writes: Vec<GraphWrite>,
    next_id: u64,
}

/// In-process adapter for tests and prototyping.
///
/// Statements are recorded rather than interpreted: `fetch` returns every
/// stored row of the statement's model, `fetch_count` their number. Graph
/// writes assign sequential ids to new entities and store them as rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, model: impl Into<String>, rows: Vec<Value>) -> Self {
        let model = model.into();
        match self.lock() {
            Ok(mut store) => store.rows.entry(model).or_default().extend(rows),
            Err(err) => warn!(model = %model, rows = rows.len(), "seed rows dropped: {}", err),
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStore>, Error> {
        self.store
            .lock()
            .map_err(|e| Error::Storage(format!("memory store poisoned: {}", e)))
    }

    pub fn rows(&self, model: &str) -> Vec<Value> {
        self.lock()
            .map(|store| store.rows.get(model).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Statements executed so far, oldest first.
    pub fn statements(&self) -> Vec<Statement> {
        self.lock()
            .map(|store| store.statements.clone())
            .unwrap_or_default()
    }

    pub fn writes(&self) -> Vec<GraphWrite> {
        self.lock()
            .map(|store| store.writes.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueryExecutor for MemoryAdapter {
    async fn fetch(&self, statement: &Statement) -> Result<Vec<Value>, Error> {
        let mut store = self.lock()?;
        store.statements.push(statement.clone());
        Ok(store.rows.get(&statement.model).cloned().unwrap_or_default())
    }

    async fn fetch_count(&self, statement: &Statement) -> Result<u64, Error> {
        let mut store = self.lock()?;
        store.statements.push(statement.clone());
        Ok(store.rows.get(&statement.model).map_or(0, |rows| rows.len() as u64))
    }
}

#[async_trait]
impl GraphWriter for MemoryAdapter {
    async fn write_graph(
        &self,
        schema: &Schema,
        model: &ModelDefinition,
        mode: GraphWriteMode,
        data: Value,
        options: &WriteOptions,
    ) -> Result<Value, Error> {
        let mut graph = GraphValue::from_json(schema, model, &data)?;

        let mut store = self.lock()?;
        store.writes.push(GraphWrite {
            model: model.name.clone(),
            mode,
            data,
            options: options.clone(),
        });
        persist(&mut store, schema, &mut graph)?;

        Ok(graph.to_json())
    }
}

fn persist(store: &mut MemoryStore, schema: &Schema, value: &mut GraphValue) -> Result<(), Error> {
    match value {
        GraphValue::Array(items) => {
            for item in items {
                persist(store, schema, item)?;
            }
        }
        GraphValue::Entity(node) => {
            let model = schema.require(&node.model)?;
            assign_id(store, model, node);
            upsert(store, model, node);
            for child in node.relations.values_mut() {
                persist(store, schema, child)?;
            }
        }
        GraphValue::Scalar(_) => {}
    }
    Ok(())
}

fn assign_id(store: &mut MemoryStore, model: &ModelDefinition, node: &mut EntityNode) {
    if let [id] = model.id_columns.as_slice() {
        if node.fields.get(id).is_none_or(Value::is_null) {
            store.next_id += 1;
            node.fields.insert(id.clone(), Value::from(store.next_id));
        }
    }
}

fn upsert(store: &mut MemoryStore, model: &ModelDefinition, node: &EntityNode) {
    let rows = store.rows.entry(model.name.clone()).or_default();
    let same_identity = |row: &Value| {
        model
            .id_columns
            .iter()
            .all(|column| row.get(column) == node.fields.get(column))
    };

    match rows.iter_mut().find(|row| same_identity(row)) {
        Some(Value::Object(existing)) => {
            for (key, value) in &node.fields {
                existing.insert(key.clone(), value.clone());
            }
        }
        _ => rows.push(Value::Object(node.fields.clone())),
    }
}
