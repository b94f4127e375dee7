use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::options::GraphOptions;

/// Column type of a model property. Drives filter value coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyType {
    #[default]
    String,
    Text,
    Integer,
    Number,
    Boolean,
    Date,
    Timestamp,
    Json,
}

impl PropertyType {
    pub fn is_textual(&self) -> bool {
        matches!(self, PropertyType::String | PropertyType::Text)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PropertyDefinitionRepr")]
pub struct PropertyDefinition {
    #[serde(rename = "type")]
    pub kind: PropertyType,
    /// Computed properties live on the entity but have no column.
    pub computed: bool,
}

// `"integer"` or `{ "type": "integer", "computed": true }`
#[derive(Deserialize)]
#[serde(untagged)]
enum PropertyDefinitionRepr {
    Short(PropertyType),
    Full {
        #[serde(rename = "type", default)]
        kind: PropertyType,
        #[serde(default)]
        computed: bool,
    },
}

impl From<PropertyDefinitionRepr> for PropertyDefinition {
    fn from(repr: PropertyDefinitionRepr) -> Self {
        match repr {
            PropertyDefinitionRepr::Short(kind) => Self {
                kind,
                computed: false,
            },
            PropertyDefinitionRepr::Full { kind, computed } => Self { kind, computed },
        }
    }
}

impl PropertyDefinition {
    pub fn new(kind: PropertyType) -> Self {
        Self {
            kind,
            computed: false,
        }
    }

    pub fn computed(kind: PropertyType) -> Self {
        Self {
            kind,
            computed: true,
        }
    }

    pub fn is_column(&self) -> bool {
        !self.computed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasOneThrough,
    HasMany,
    ManyToMany,
}

impl RelationKind {
    /// One row on the related side per owning row.
    pub fn is_one_to_one(&self) -> bool {
        matches!(
            self,
            RelationKind::BelongsTo | RelationKind::HasOne | RelationKind::HasOneThrough
        )
    }
}

/// Join table of a `hasOneThrough` / `manyToMany` relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughDefinition {
    pub table: String,
    /// Column pointing at the owning model.
    pub from: String,
    /// Column pointing at the related model.
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDefinition {
    /// Filled in from the relation's key when the model is registered.
    #[serde(default)]
    pub name: String,
    #[serde(rename = "relation")]
    pub kind: RelationKind,
    /// Related model name.
    pub model: String,
    /// Column on the owning model.
    pub from: String,
    /// Column on the related model.
    pub to: String,
    #[serde(default)]
    pub through: Option<ThroughDefinition>,
    /// The owning side owns the related rows: they are inserted and deleted
    /// with it, never merely (un)related.
    #[serde(default)]
    pub owner: bool,
    #[serde(default)]
    pub graph_options: GraphOptions,
}

impl RelationDefinition {
    pub fn new(
        kind: RelationKind,
        model: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            name: String::new(),
            kind,
            model: model.into(),
            from: from.into(),
            to: to.into(),
            through: None,
            owner: false,
            graph_options: GraphOptions::default(),
        }
    }

    pub fn through(mut self, table: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.through = Some(ThroughDefinition {
            table: table.into(),
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn owner(mut self) -> Self {
        self.owner = true;
        self
    }

    pub fn graph_options(mut self, options: GraphOptions) -> Self {
        self.graph_options = options;
        self
    }

    /// Graph options in effect for this relation. Owner relations fall back
    /// to `relate: false, unrelate: false` for anything not set explicitly.
    pub fn effective_graph_options(&self) -> GraphOptions {
        if self.owner {
            let fallback = GraphOptions::new().relate(false).unrelate(false);
            GraphOptions::merge(&fallback, &self.graph_options)
        } else {
            self.graph_options
        }
    }
}

fn default_id_columns() -> Vec<String> {
    vec!["id".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_id_columns")]
    pub id_columns: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDefinition>,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationDefinition>,
    /// Named where-objects, applied through the `scope` parameter. A scope
    /// named `default` applies to every query unless ignored.
    #[serde(default)]
    pub scopes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub default_eager: Option<String>,
    #[serde(default)]
    pub default_order: Vec<String>,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            id_columns: default_id_columns(),
            properties: BTreeMap::new(),
            relations: BTreeMap::new(),
            scopes: BTreeMap::new(),
            default_eager: None,
            default_order: Vec::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn id_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, property: PropertyDefinition) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>, mut relation: RelationDefinition) -> Self {
        let name = name.into();
        relation.name = name.clone();
        self.relations.insert(name, relation);
        self
    }

    pub fn with_scope(mut self, name: impl Into<String>, filter: serde_json::Value) -> Self {
        self.scopes.insert(name.into(), filter);
        self
    }

    pub fn default_eager(mut self, expression: impl Into<String>) -> Self {
        self.default_eager = Some(expression.into());
        self
    }

    pub fn default_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_order = order.into_iter().map(Into::into).collect();
        self
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.get(name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.get(name)
    }

    /// A stored (non-computed) property.
    pub fn has_column(&self, name: &str) -> bool {
        self.property(name).is_some_and(PropertyDefinition::is_column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|(_, property)| property.is_column())
            .map(|(name, _)| name.as_str())
    }

    pub fn is_id_column(&self, name: &str) -> bool {
        self.id_columns.iter().any(|column| column == name)
    }
}
