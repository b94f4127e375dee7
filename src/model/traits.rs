use serde::{Deserialize, Serialize};

use super::Schema;
use crate::query::QueryBuilder;

/// A typed view over the rows of a registered model.
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct Person { id: i64, first_name: String }
///
/// impl Entity for Person {
///     const MODEL: &'static str = "Person";
/// }
///
/// let people: Vec<Person> = engine.find_entities::<Person>(&params, &[]).await?;
/// ```
pub trait Entity: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static {
    /// Name the model is registered under in the [`Schema`](super::Schema).
    const MODEL: &'static str;

    fn model_name(&self) -> &'static str {
        Self::MODEL
    }

    /// Start a query on this entity's model.
    fn query(schema: &Schema) -> Result<QueryBuilder<'_>, crate::Error> {
        QueryBuilder::new(schema, Self::MODEL)
    }

    fn from_row(row: serde_json::Value) -> Result<Self, crate::Error> {
        serde_json::from_value(row).map_err(|e| crate::Error::Deserialize(e.to_string()))
    }

    fn to_row(&self) -> Result<serde_json::Value, crate::Error> {
        serde_json::to_value(self).map_err(|e| crate::Error::Serialize(e.to_string()))
    }
}
