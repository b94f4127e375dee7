use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::Error;
use crate::model::{ModelDefinition, Schema};

/// Input graph, typed against the schema: objects become entities of the
/// model they sit under, relation fields are split from plain fields.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphValue {
    Entity(EntityNode),
    Array(Vec<GraphValue>),
    Scalar(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityNode {
    pub model: String,
    pub fields: Map<String, Value>,
    /// Relation fields present on the input, `null` included.
    pub relations: BTreeMap<String, GraphValue>,
}

impl GraphValue {
    pub fn from_json(schema: &Schema, model: &ModelDefinition, value: &Value) -> Result<Self, Error> {
        match value {
            Value::Object(map) => Ok(GraphValue::Entity(EntityNode::from_json(schema, model, map)?)),
            Value::Array(items) => items
                .iter()
                .map(|item| GraphValue::from_json(schema, model, item))
                .collect::<Result<Vec<_>, _>>()
                .map(GraphValue::Array),
            other => Ok(GraphValue::Scalar(other.clone())),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            GraphValue::Entity(node) => node.to_json(),
            GraphValue::Array(items) => Value::Array(items.iter().map(GraphValue::to_json).collect()),
            GraphValue::Scalar(value) => value.clone(),
        }
    }

    pub fn as_entity(&self) -> Option<&EntityNode> {
        match self {
            GraphValue::Entity(node) => Some(node),
            _ => None,
        }
    }
}

impl EntityNode {
    fn from_json(schema: &Schema, model: &ModelDefinition, map: &Map<String, Value>) -> Result<Self, Error> {
        let mut node = EntityNode {
            model: model.name.clone(),
            fields: Map::new(),
            relations: BTreeMap::new(),
        };

        for (key, value) in map {
            match model.relation(key) {
                Some(relation) => {
                    let related = schema.related(relation)?;
                    node.relations
                        .insert(key.clone(), GraphValue::from_json(schema, related, value)?);
                }
                None => {
                    node.fields.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(node)
    }

    /// True when every identity column carries a non-null value.
    pub fn has_identity(&self, model: &ModelDefinition) -> bool {
        !model.id_columns.is_empty()
            && model
                .id_columns
                .iter()
                .all(|column| self.fields.get(column).is_some_and(|v| !v.is_null()))
    }

    /// Copy holding only the identity fields, as used to relate an existing row.
    pub fn reference(&self, model: &ModelDefinition) -> EntityNode {
        let fields = model
            .id_columns
            .iter()
            .filter_map(|column| {
                self.fields
                    .get(column)
                    .map(|value| (column.clone(), value.clone()))
            })
            .collect();

        EntityNode {
            model: self.model.clone(),
            fields,
            relations: BTreeMap::new(),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut map = self.fields.clone();
        for (name, value) in &self.relations {
            map.insert(name.clone(), value.to_json());
        }
        Value::Object(map)
    }
}

/// Location of a value inside the input data: `0/pets/1/owner`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataPath(Vec<PathSegment>);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
    Index(usize),
    Field(String),
}

impl DataPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn index(&self, index: usize) -> Self {
        let mut path = self.clone();
        path.0.push(PathSegment::Index(index));
        path
    }

    pub fn field(&self, name: &str) -> Self {
        let mut path = self.clone();
        path.0.push(PathSegment::Field(name.to_string()));
        path
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Walks `root` along this path.
    pub fn locate_mut<'v>(&self, root: &'v mut Value) -> Option<&'v mut Value> {
        self.0.iter().try_fold(root, |current, segment| match segment {
            PathSegment::Index(index) => current.as_array_mut()?.get_mut(*index),
            PathSegment::Field(name) => current.as_object_mut()?.get_mut(name),
        })
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match segment {
                PathSegment::Index(index) => write!(f, "{}", index)?,
                PathSegment::Field(name) => f.write_str(name)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{PropertyDefinition, PropertyType, RelationDefinition, RelationKind};

    fn schema() -> Schema {
        Schema::new()
            .with_model(
                ModelDefinition::new("Person")
                    .with_property("name", PropertyDefinition::new(PropertyType::String))
                    .with_relation(
                        "pets",
                        RelationDefinition::new(RelationKind::HasMany, "Animal", "id", "ownerId"),
                    ),
            )
            .with_model(ModelDefinition::new("Animal"))
    }

    #[test]
    fn relation_fields_are_split_from_plain_fields() {
        let schema = schema();
        let person = schema.require("Person").unwrap();
        let input = json!({ "id": 1, "name": "Jennifer", "pets": [{ "id": 4, "name": "Doggo" }] });

        let value = GraphValue::from_json(&schema, person, &input).unwrap();
        let node = value.as_entity().unwrap();

        assert_eq!(node.fields.len(), 2);
        assert!(node.relations.contains_key("pets"));
        assert!(node.has_identity(person));
        assert_eq!(node.reference(person).to_json(), json!({ "id": 1 }));
        assert_eq!(value.to_json(), input);
    }

    #[test]
    fn data_path_locates_nested_values() {
        let mut data = json!([{ "pets": [{ "id": 1 }, { "id": 2 }] }]);
        let path = DataPath::root().index(0).field("pets").index(1);

        assert_eq!(path.to_string(), "0/pets/1");
        assert_eq!(path.locate_mut(&mut data), Some(&mut json!({ "id": 2 })));
        assert_eq!(DataPath::root().index(3).locate_mut(&mut data), None);
    }
}
