use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::adapters::{OWNER_KEY, QueryExecutor, render_eager_select};
use crate::error::Error;
use crate::model::ModelDefinition;
use crate::query::{QueryBuilder, QueryContext, RelationNode};

type LoadFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>>;

/// Loads the relations named by `nodes` onto `rows`, one statement per
/// relation and level. To-one relations become an object or `null`, to-many
/// relations an array.
pub fn load_relations<'a>(
    executor: &'a dyn QueryExecutor,
    ctx: QueryContext<'a>,
    model: &'a ModelDefinition,
    rows: &'a mut [Value],
    nodes: &'a BTreeMap<String, RelationNode>,
) -> LoadFuture<'a> {
    Box::pin(async move {
        for node in nodes.values() {
            load_relation(executor, ctx, model, rows, node).await?;
        }
        Ok(())
    })
}

/// Columns of `model` the relations in `nodes` are keyed on.
pub fn key_columns(model: &ModelDefinition, nodes: &BTreeMap<String, RelationNode>) -> Vec<String> {
    let mut columns = Vec::new();
    for node in nodes.values() {
        if let Some(relation) = model.relation(&node.name) {
            if !columns.contains(&relation.from) {
                columns.push(relation.from.clone());
            }
        }
    }
    columns
}

async fn load_relation(
    executor: &dyn QueryExecutor,
    ctx: QueryContext<'_>,
    model: &ModelDefinition,
    rows: &mut [Value],
    node: &RelationNode,
) -> Result<(), Error> {
    let relation = model.relation(&node.name).ok_or_else(|| Error::UnknownRelation {
        model: model.name.clone(),
        relation: node.name.clone(),
    })?;
    let related = ctx.schema.related(relation)?;

    let mut keys: Vec<Value> = Vec::new();
    for row in rows.iter() {
        if let Some(key) = row.get(&relation.from) {
            if !key.is_null() && !keys.contains(key) {
                keys.push(key.clone());
            }
        }
    }

    let mut children = if keys.is_empty() {
        Vec::new()
    } else {
        let statement = {
            let mut builder = QueryBuilder::with_context(ctx, &related.name)?;
            builder.clear_eager();
            builder.with_scope(node.modifiers.iter().cloned())?;
            if let Some(columns) = &node.columns {
                let mut columns = columns.clone();
                for column in key_columns(related, &node.children) {
                    if !columns.contains(&column) {
                        columns.push(column);
                    }
                }
                builder.select(columns)?;
            }
            let mut plan = builder.finalize()?;
            plan.pagination = None;
            render_eager_select(ctx.schema, ctx.settings.dialect, &plan, relation, &keys)?
        };
        executor.fetch(&statement).await?
    };

    if !node.children.is_empty() && !children.is_empty() {
        load_relations(executor, ctx, related, &mut children, &node.children).await?;
    }

    let key_field = match relation.through {
        Some(_) => OWNER_KEY,
        None => relation.to.as_str(),
    };
    let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
    for mut child in children {
        let key = child.get(key_field).map(key_of);
        if relation.through.is_some() {
            if let Some(object) = child.as_object_mut() {
                object.remove(OWNER_KEY);
            }
        }
        if let Some(key) = key {
            groups.entry(key).or_default().push(child);
        }
    }

    for row in rows.iter_mut() {
        let group = row
            .get(&relation.from)
            .map(key_of)
            .and_then(|key| groups.get(&key));
        let value = if relation.kind.is_one_to_one() {
            group
                .and_then(|children| children.first().cloned())
                .unwrap_or(Value::Null)
        } else {
            Value::Array(group.cloned().unwrap_or_default())
        };
        if let Some(object) = row.as_object_mut() {
            object.insert(node.name.clone(), value);
        }
    }

    Ok(())
}

fn key_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
