use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GraphOption {
    Relate,
    Unrelate,
    InsertMissing,
    Update,
    NoDelete,
}

impl GraphOption {
    pub const ALL: [GraphOption; 5] = [
        GraphOption::Relate,
        GraphOption::Unrelate,
        GraphOption::InsertMissing,
        GraphOption::Update,
        GraphOption::NoDelete,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GraphOption::Relate => "relate",
            GraphOption::Unrelate => "unrelate",
            GraphOption::InsertMissing => "insertMissing",
            GraphOption::Update => "update",
            GraphOption::NoDelete => "noDelete",
        }
    }
}

impl std::fmt::Display for GraphOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Boolean graph options. `None` means "not set here".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrelate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_missing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_delete: Option<bool>,
}

impl GraphOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relate(self, value: bool) -> Self {
        self.with(GraphOption::Relate, value)
    }

    pub fn unrelate(self, value: bool) -> Self {
        self.with(GraphOption::Unrelate, value)
    }

    pub fn insert_missing(self, value: bool) -> Self {
        self.with(GraphOption::InsertMissing, value)
    }

    pub fn update(self, value: bool) -> Self {
        self.with(GraphOption::Update, value)
    }

    pub fn no_delete(self, value: bool) -> Self {
        self.with(GraphOption::NoDelete, value)
    }

    pub fn with(mut self, option: GraphOption, value: bool) -> Self {
        self.set(option, value);
        self
    }

    pub fn set(&mut self, option: GraphOption, value: bool) {
        *self.slot(option) = Some(value);
    }

    pub fn get(&self, option: GraphOption) -> Option<bool> {
        match option {
            GraphOption::Relate => self.relate,
            GraphOption::Unrelate => self.unrelate,
            GraphOption::InsertMissing => self.insert_missing,
            GraphOption::Update => self.update,
            GraphOption::NoDelete => self.no_delete,
        }
    }

    fn slot(&mut self, option: GraphOption) -> &mut Option<bool> {
        match option {
            GraphOption::Relate => &mut self.relate,
            GraphOption::Unrelate => &mut self.unrelate,
            GraphOption::InsertMissing => &mut self.insert_missing,
            GraphOption::Update => &mut self.update,
            GraphOption::NoDelete => &mut self.no_delete,
        }
    }

    /// Option keys that are set.
    pub fn keys(&self) -> impl Iterator<Item = GraphOption> + '_ {
        GraphOption::ALL
            .into_iter()
            .filter(|option| self.get(*option).is_some())
    }

    pub fn len(&self) -> usize {
        self.keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `child` wins wherever it sets a key.
    pub fn merge(parent: &GraphOptions, child: &GraphOptions) -> GraphOptions {
        let mut merged = *parent;
        for option in child.keys() {
            merged.set(option, child.get(option).unwrap_or_default());
        }
        merged
    }
}

/// Value of one option handed to the graph writer: a plain switch, or the
/// list of relation paths (`"pets"`, `"pets.owner"`) it is enabled for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Enabled(bool),
    Paths(Vec<String>),
}

impl OptionValue {
    pub fn is_enabled_at(&self, relation_path: &str) -> bool {
        match self {
            OptionValue::Enabled(enabled) => *enabled,
            OptionValue::Paths(paths) => paths.iter().any(|path| path == relation_path),
        }
    }
}

/// Resolved options for a graph write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions(BTreeMap<GraphOption, OptionValue>);

impl WriteOptions {
    pub fn insert(&mut self, option: GraphOption, value: OptionValue) {
        self.0.insert(option, value);
    }

    pub fn get(&self, option: GraphOption) -> Option<&OptionValue> {
        self.0.get(&option)
    }

    pub fn is_enabled_at(&self, option: GraphOption, relation_path: &str) -> bool {
        self.get(option)
            .is_some_and(|value| value.is_enabled_at(relation_path))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GraphOption, &OptionValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_child() {
        let parent = GraphOptions::new().relate(true).update(true);
        let child = GraphOptions::new().relate(false).no_delete(true);
        let merged = GraphOptions::merge(&parent, &child);

        assert_eq!(merged.relate, Some(false));
        assert_eq!(merged.update, Some(true));
        assert_eq!(merged.no_delete, Some(true));
        assert_eq!(merged.unrelate, None);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn write_options_serialize_as_json_object() {
        let mut options = WriteOptions::default();
        options.insert(GraphOption::Relate, OptionValue::Paths(vec!["pets".into()]));
        options.insert(GraphOption::InsertMissing, OptionValue::Enabled(true));

        assert_eq!(
            serde_json::to_value(&options).unwrap(),
            serde_json::json!({ "relate": ["pets"], "insertMissing": true })
        );
        assert!(options.is_enabled_at(GraphOption::Relate, "pets"));
        assert!(!options.is_enabled_at(GraphOption::Relate, "pets.owner"));
        assert!(!options.is_enabled_at(GraphOption::Unrelate, "pets"));
    }
}
