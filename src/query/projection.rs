use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::QueryError;
use crate::model::ModelDefinition;

/// Per-model field projection collected from `pick` and `omit`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Projection {
    /// Fields to keep. `None` keeps everything not omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pick: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub omit: BTreeSet<String>,
}

impl Projection {
    pub fn pick(&mut self, fields: BTreeSet<String>) {
        self.pick.get_or_insert_with(BTreeSet::new).extend(fields);
    }

    pub fn omit(&mut self, fields: BTreeSet<String>) {
        self.omit.extend(fields);
    }

    pub fn keeps(&self, field: &str) -> bool {
        !self.omit.contains(field) && self.pick.as_ref().is_none_or(|pick| pick.contains(field))
    }

    /// Columns of `model` to select. Identity columns are always kept.
    pub fn columns(&self, model: &ModelDefinition) -> Vec<String> {
        model
            .columns()
            .filter(|column| model.is_id_column(column) || self.keeps(column))
            .map(String::from)
            .collect()
    }
}

/// Parses `Person[firstName,lastName],Animal[name]`.
pub fn parse_projection(input: &str) -> Result<BTreeMap<String, BTreeSet<String>>, QueryError> {
    let error = |detail: &str| {
        QueryError::unsupported_query(format!("Invalid projection `{}`: {}", input, detail))
    };

    let mut projections = BTreeMap::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let open = rest.find('[').ok_or_else(|| error("expected `[`"))?;
        let close = rest.find(']').ok_or_else(|| error("missing `]`"))?;
        if close < open {
            return Err(error("unexpected `]`"));
        }

        let model = rest[..open].trim();
        if model.is_empty() {
            return Err(error("expected a model name"));
        }
        let fields: BTreeSet<String> = rest[open + 1..close]
            .split(',')
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .map(String::from)
            .collect();

        projections
            .entry(model.to_string())
            .or_insert_with(BTreeSet::new)
            .extend(fields);

        rest = rest[close + 1..].trim_start();
        if let Some(stripped) = rest.strip_prefix(',') {
            rest = stripped.trim_start();
        } else if !rest.is_empty() {
            return Err(error("expected `,` between models"));
        }
    }

    Ok(projections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PropertyDefinition, PropertyType};

    #[test]
    fn parses_models_and_fields() {
        let parsed = parse_projection("Person[firstName, lastName], Animal[name]").unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed["Person"].contains("lastName"));
        assert!(parse_projection("Person[firstName").is_err());
        assert!(parse_projection("Person[a] Animal[b]").is_err());
    }

    #[test]
    fn columns_keep_identity() {
        let model = ModelDefinition::new("Person")
            .with_property("id", PropertyDefinition::new(PropertyType::Integer))
            .with_property("firstName", PropertyDefinition::new(PropertyType::String))
            .with_property("lastName", PropertyDefinition::new(PropertyType::String))
            .with_property("age", PropertyDefinition::new(PropertyType::Integer));

        let mut projection = Projection::default();
        projection.pick(["firstName".to_string(), "age".to_string()].into());
        projection.omit(["age".to_string()].into());

        assert_eq!(projection.columns(&model), vec!["firstName", "id"]);
    }
}
