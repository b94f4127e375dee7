pub mod meta;
pub mod traits;

pub use meta::*;
pub use traits::*;

use std::collections::BTreeMap;

use crate::error::Error;

/// Registry of model definitions, keyed by model name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    models: BTreeMap<String, ModelDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `{ "<Model>": { ...definition } }` and validates relation targets.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| Error::Deserialize(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        let models: BTreeMap<String, ModelDefinition> =
            serde_json::from_value(value).map_err(|e| Error::Deserialize(e.to_string()))?;

        let mut schema = Self::new();
        for (name, mut model) in models {
            model.name = name;
            schema.register(model);
        }
        schema.validate()?;
        Ok(schema)
    }

    pub fn with_model(mut self, model: ModelDefinition) -> Self {
        self.register(model);
        self
    }

    /// Registers `model`, replacing a previous definition with the same name.
    /// Identity columns missing from `properties` are added as integers.
    pub fn register(&mut self, mut model: ModelDefinition) {
        for (name, relation) in model.relations.iter_mut() {
            relation.name = name.clone();
        }
        for column in &model.id_columns {
            model
                .properties
                .entry(column.clone())
                .or_insert_with(|| PropertyDefinition::new(PropertyType::Integer));
        }
        self.models.insert(model.name.clone(), model);
    }

    /// Every relation must point at a registered model.
    pub fn validate(&self) -> Result<(), Error> {
        for model in self.models.values() {
            for relation in model.relations.values() {
                if !self.models.contains_key(&relation.model) {
                    return Err(Error::UnknownModel(format!(
                        "{} (target of {}.{})",
                        relation.model, model.name, relation.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn model(&self, name: &str) -> Option<&ModelDefinition> {
        self.models.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&ModelDefinition, Error> {
        self.model(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    pub fn related(&self, relation: &RelationDefinition) -> Result<&ModelDefinition, Error> {
        self.require(&relation.model)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDefinition> {
        self.models.values()
    }
}
