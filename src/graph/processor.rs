use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::config::GraphSettings;
use crate::error::Error;
use crate::graph::node::{DataPath, EntityNode, GraphValue};
use crate::graph::options::{GraphOption, GraphOptions, OptionValue, WriteOptions};
use crate::model::{ModelDefinition, Schema};

/// Prepares nested input for a graph write.
///
/// Relation-level graph options are resolved into per-path overrides, nodes
/// on relate paths that carry an identity are replaced by identity-only stubs,
/// and the relations stripped from those stubs are kept so they can be put
/// back onto the write result with [`GraphProcessor::restore_relations`].
#[derive(Debug)]
pub struct GraphProcessor<'a> {
    schema: &'a Schema,
    model: &'a ModelDefinition,
    is_array: bool,
    options: GraphOptions,
    settings: GraphSettings,
    overrides: BTreeMap<GraphOption, Vec<String>>,
    data: Vec<GraphValue>,
    removed_relations: BTreeMap<DataPath, BTreeMap<String, GraphValue>>,
}

impl<'a> GraphProcessor<'a> {
    pub fn process(
        schema: &'a Schema,
        model: &str,
        data: &Value,
        options: GraphOptions,
        settings: GraphSettings,
    ) -> Result<Self, Error> {
        let model = schema.require(model)?;
        let is_array = data.is_array();
        let input = match GraphValue::from_json(schema, model, data)? {
            GraphValue::Array(items) => items,
            other => vec![other],
        };

        let mut processor = Self {
            schema,
            model,
            is_array,
            options,
            settings,
            overrides: BTreeMap::new(),
            data: Vec::new(),
            removed_relations: BTreeMap::new(),
        };

        if settings.process_overrides {
            processor.collect_overrides()?;
            if !processor.overrides.is_empty() {
                processor.process_overrides(&input)?;
            }
        }

        let root = DataPath::root();
        let mut data = Vec::with_capacity(input.len());
        for (index, value) in input.iter().enumerate() {
            data.push(processor.process_relates(value, model, "", &root.index(index))?);
        }
        processor.data = data;

        tracing::debug!(
            model = %model.name,
            overrides = processor.overrides.len(),
            stripped = processor.removed_relations.len(),
            "graph processed"
        );

        Ok(processor)
    }

    /// Processed input, in the shape it was given (object or array).
    pub fn data(&self) -> Value {
        if self.is_array {
            Value::Array(self.data.iter().map(GraphValue::to_json).collect())
        } else {
            self.data
                .first()
                .map(GraphValue::to_json)
                .unwrap_or(Value::Null)
        }
    }

    pub fn graph(&self) -> &[GraphValue] {
        &self.data
    }

    /// Global options, with every overridden key replaced by the relation
    /// paths it is enabled for.
    pub fn options(&self) -> WriteOptions {
        let mut options = WriteOptions::default();
        for key in self.options.keys() {
            options.insert(key, OptionValue::Enabled(self.options.get(key).unwrap_or_default()));
        }
        for (key, paths) in &self.overrides {
            options.insert(*key, OptionValue::Paths(paths.clone()));
        }
        options
    }

    pub fn overrides(&self) -> &BTreeMap<GraphOption, Vec<String>> {
        &self.overrides
    }

    /// Relations removed from relate stubs, keyed by data path.
    pub fn removed_relations(&self) -> &BTreeMap<DataPath, BTreeMap<String, GraphValue>> {
        &self.removed_relations
    }

    /// Puts the stripped relations back onto `result`, which must mirror the
    /// shape of the processed input.
    pub fn restore_relations(self, result: Value) -> Value {
        if self.removed_relations.is_empty() {
            return result;
        }

        let mut rows = match result {
            Value::Array(items) => Value::Array(items),
            other => Value::Array(vec![other]),
        };

        for (path, relations) in self.removed_relations {
            match path.locate_mut(&mut rows) {
                Some(Value::Object(target)) => {
                    for (name, value) in relations {
                        target.insert(name, value.to_json());
                    }
                }
                _ => {
                    tracing::warn!(path = %path, "Unable to restore relations, path not found in write result");
                }
            }
        }

        match rows {
            Value::Array(items) if !self.is_array => items.into_iter().next().unwrap_or(Value::Null),
            rows => rows,
        }
    }

    // Static pass over the model graph: an option key is overridden as soon
    // as one relation sets it to something other than the global value.
    fn collect_overrides(&mut self) -> Result<(), Error> {
        let option_count = GraphOption::ALL.len();
        let mut processed = HashSet::new();
        self.collect_model_overrides(self.model, option_count, &mut processed)
    }

    fn collect_model_overrides(
        &mut self,
        model: &'a ModelDefinition,
        option_count: usize,
        processed: &mut HashSet<&'a str>,
    ) -> Result<(), Error> {
        if !processed.insert(model.name.as_str()) {
            return Ok(());
        }

        for relation in model.relations.values() {
            let graph_options = relation.effective_graph_options();
            for key in graph_options.keys() {
                if !self.overrides.contains_key(&key) && graph_options.get(key) != self.options.get(key) {
                    self.overrides.insert(key, Vec::new());
                }
            }

            if self.overrides.len() < option_count {
                let related = self.schema.related(relation)?;
                self.collect_model_overrides(related, option_count, processed)?;
            }
        }

        Ok(())
    }

    fn process_overrides(&mut self, input: &[GraphValue]) -> Result<(), Error> {
        for value in input {
            self.collect_override_paths(value, self.model, "")?;
        }
        Ok(())
    }

    fn collect_override_paths(
        &mut self,
        value: &GraphValue,
        model: &'a ModelDefinition,
        relation_path: &str,
    ) -> Result<(), Error> {
        match value {
            GraphValue::Array(items) => {
                for item in items {
                    self.collect_override_paths(item, model, relation_path)?;
                }
            }
            GraphValue::Entity(node) => {
                for (name, child) in &node.relations {
                    let relation = model.relation(name).ok_or_else(|| Error::UnknownRelation {
                        model: model.name.clone(),
                        relation: name.clone(),
                    })?;
                    let path = join_path(relation_path, name);
                    let graph_options = relation.effective_graph_options();

                    for (key, paths) in self.overrides.iter_mut() {
                        let enabled = graph_options
                            .get(*key)
                            .or(self.options.get(*key))
                            .unwrap_or(false);
                        if enabled && !paths.contains(&path) {
                            paths.push(path.clone());
                        }
                    }

                    let related = self.schema.related(relation)?;
                    self.collect_override_paths(child, related, &path)?;
                }
            }
            GraphValue::Scalar(_) => {}
        }
        Ok(())
    }

    /// Whether entities found at `relation_path` are related rather than
    /// written. The root is always written.
    pub fn should_relate(&self, relation_path: &str) -> bool {
        if relation_path.is_empty() {
            return false;
        }
        match self.overrides.get(&GraphOption::Relate) {
            Some(paths) => paths.iter().any(|path| path == relation_path),
            None => self.options.relate.unwrap_or(false),
        }
    }

    fn process_relates(
        &mut self,
        value: &GraphValue,
        model: &'a ModelDefinition,
        relation_path: &str,
        data_path: &DataPath,
    ) -> Result<GraphValue, Error> {
        match value {
            GraphValue::Scalar(value) => Ok(GraphValue::Scalar(value.clone())),
            GraphValue::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    self.process_relates(item, model, relation_path, &data_path.index(index))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(GraphValue::Array),
            GraphValue::Entity(node) => {
                if self.should_relate(relation_path) && node.has_identity(model) {
                    if self.settings.restore_relations && !node.relations.is_empty() {
                        self.removed_relations
                            .insert(data_path.clone(), node.relations.clone());
                    }
                    return Ok(GraphValue::Entity(node.reference(model)));
                }

                let mut clone = EntityNode {
                    model: node.model.clone(),
                    fields: node.fields.clone(),
                    relations: BTreeMap::new(),
                };
                for (name, child) in &node.relations {
                    let relation = model.relation(name).ok_or_else(|| Error::UnknownRelation {
                        model: model.name.clone(),
                        relation: name.clone(),
                    })?;
                    let related = self.schema.related(relation)?;
                    let processed = self.process_relates(
                        child,
                        related,
                        &join_path(relation_path, name),
                        &data_path.field(name),
                    )?;
                    clone.relations.insert(name.clone(), processed);
                }
                Ok(GraphValue::Entity(clone))
            }
        }
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
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
                        RelationDefinition::new(RelationKind::HasMany, "Animal", "id", "ownerId")
                            .graph_options(GraphOptions::new().relate(true)),
                    )
                    .with_relation(
                        "parent",
                        RelationDefinition::new(RelationKind::BelongsTo, "Person", "parentId", "id"),
                    ),
            )
            .with_model(
                ModelDefinition::new("Animal")
                    .with_property("name", PropertyDefinition::new(PropertyType::String))
                    .with_relation(
                        "toys",
                        RelationDefinition::new(RelationKind::HasMany, "Toy", "id", "animalId"),
                    ),
            )
            .with_model(ModelDefinition::new("Toy"))
    }

    #[test]
    fn relation_override_becomes_path_list() {
        let schema = schema();
        let data = json!({
            "name": "Jennifer",
            "pets": [{ "id": 4, "name": "Doggo", "toys": [{ "name": "Ball" }] }],
            "parent": { "name": "Sylvester" }
        });

        let processor = GraphProcessor::process(
            &schema,
            "Person",
            &data,
            GraphOptions::new().relate(false),
            GraphSettings::default(),
        )
        .unwrap();

        assert_eq!(processor.overrides().get(&GraphOption::Relate), Some(&vec!["pets".to_string()]));
        assert!(processor.should_relate("pets"));
        assert!(!processor.should_relate("parent"));
        assert!(!processor.should_relate(""));

        assert_eq!(
            processor.data(),
            json!({ "name": "Jennifer", "pets": [{ "id": 4 }], "parent": { "name": "Sylvester" } })
        );

        let options = processor.options();
        assert_eq!(
            options.get(GraphOption::Relate),
            Some(&OptionValue::Paths(vec!["pets".into()]))
        );
    }

    #[test]
    fn stripped_relations_are_restored_onto_result() {
        let schema = schema();
        let data = json!([{ "name": "Jennifer", "pets": [{ "id": 4, "toys": [{ "name": "Ball" }] }] }]);

        let processor = GraphProcessor::process(
            &schema,
            "Person",
            &data,
            GraphOptions::new(),
            GraphSettings::default(),
        )
        .unwrap();

        let stripped: Vec<String> = processor
            .removed_relations()
            .keys()
            .map(ToString::to_string)
            .collect();
        assert_eq!(stripped, vec!["0/pets/0".to_string()]);

        let result = json!([{ "id": 1, "name": "Jennifer", "pets": [{ "id": 4 }] }]);
        assert_eq!(
            processor.restore_relations(result),
            json!([{ "id": 1, "name": "Jennifer", "pets": [{ "id": 4, "toys": [{ "name": "Ball" }] }] }])
        );
    }

    #[test]
    fn nodes_without_identity_are_never_related() {
        let schema = schema();
        let data = json!({ "pets": [{ "name": "New pet" }] });

        let processor = GraphProcessor::process(
            &schema,
            "Person",
            &data,
            GraphOptions::new().relate(true),
            GraphSettings::default(),
        )
        .unwrap();

        assert_eq!(processor.data(), data);
        assert!(processor.removed_relations().is_empty());
    }
}
