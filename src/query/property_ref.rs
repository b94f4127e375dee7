use std::collections::BTreeSet;

use crate::error::QueryError;
use crate::model::{ModelDefinition, PropertyDefinition, RelationKind, Schema};
use crate::query::plan::Direction;

/// Set of references a caller may filter on. A reference is permitted when
/// its full dotted path or its root segment is listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: BTreeSet<String>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>) {
        self.entries.insert(path.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains(path)
    }

    pub fn allows(&self, path: &[String]) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        let full = path.join(".");
        self.entries.contains(&full) || path.first().is_some_and(|root| self.entries.contains(root))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

/// One relation hop of a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationHop {
    pub name: String,
    pub kind: RelationKind,
    /// Related model.
    pub model: String,
    /// Join alias, the relation path up to this hop joined with `:`.
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefTarget {
    Property(PropertyDefinition),
    Relation(RelationKind),
}

/// A resolved `relation.relation.property[:filter]` reference.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRef {
    /// Reference as given, minus direction.
    pub key: String,
    /// Dotted path split into segments.
    pub path: Vec<String>,
    pub name: String,
    pub relations: Vec<RelationHop>,
    /// Model owning the final segment.
    pub model: String,
    /// Table name or join alias the column is read from.
    pub table_ref: String,
    pub target: RefTarget,
    pub direction: Option<Direction>,
    pub filter: Option<String>,
}

impl PropertyRef {
    /// Resolves `reference` against `root`. With `parse_direction`, a trailing
    /// ` asc`/` desc` token is split off first.
    pub fn resolve(
        schema: &Schema,
        root: &ModelDefinition,
        reference: &str,
        parse_direction: bool,
    ) -> Result<Self, QueryError> {
        let mut key = reference.trim();
        let mut direction = None;

        if parse_direction {
            if let Some((head, tail)) = key.rsplit_once(char::is_whitespace) {
                if let Some(parsed) = Direction::parse(tail.trim()) {
                    key = head.trim();
                    direction = Some(parsed);
                }
            }
        }

        let (path_part, filter) = match key.split_once(':') {
            Some((path, filter)) => (path.trim(), Some(filter.trim().to_string())),
            None => (key, None),
        };

        if path_part.is_empty() {
            return Err(QueryError::invalid_reference(format!(
                "Empty property reference `{}`",
                reference
            )));
        }

        let path: Vec<String> = path_part.split('.').map(|s| s.trim().to_string()).collect();
        if path.iter().any(String::is_empty) {
            return Err(QueryError::invalid_reference(format!(
                "Malformed property reference `{}`",
                reference
            )));
        }

        let mut model = root;
        let mut relations = Vec::new();
        let (name, parents) = path.split_last().ok_or_else(|| {
            QueryError::invalid_reference(format!("Empty property reference `{}`", reference))
        })?;

        for segment in parents {
            let relation = model.relation(segment).ok_or_else(|| {
                QueryError::invalid_reference(format!(
                    "Unknown relation `{}` on `{}` in `{}`",
                    segment, model.name, reference
                ))
            })?;
            if !relation.kind.is_one_to_one() {
                return Err(QueryError::invalid_reference(format!(
                    "Relation `{}` in `{}` is not one-to-one",
                    segment, reference
                )));
            }
            let related = schema.model(&relation.model).ok_or_else(|| {
                QueryError::invalid_reference(format!("Unknown model `{}`", relation.model))
            })?;

            let alias = match relations.last() {
                Some(RelationHop { alias, .. }) => format!("{}:{}", alias, segment),
                None => segment.clone(),
            };
            relations.push(RelationHop {
                name: segment.clone(),
                kind: relation.kind,
                model: related.name.clone(),
                alias,
            });
            model = related;
        }

        let target = if let Some(property) = model.property(name) {
            RefTarget::Property(*property)
        } else if let Some(relation) = model.relation(name) {
            RefTarget::Relation(relation.kind)
        } else {
            return Err(QueryError::invalid_reference(format!(
                "Unknown property `{}` on `{}`",
                name, model.name
            )));
        };

        let table_ref = match relations.last() {
            Some(hop) => hop.alias.clone(),
            None => root.table_name().to_string(),
        };

        Ok(PropertyRef {
            key: key.to_string(),
            name: name.clone(),
            path,
            relations,
            model: model.name.clone(),
            table_ref,
            target,
            direction,
            filter,
        })
    }

    /// `table.column`, or `alias.column` when reached through relations.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.table_ref, self.name)
    }

    pub fn relation_path(&self) -> Vec<String> {
        self.relations.iter().map(|hop| hop.name.clone()).collect()
    }

    pub fn requires_join(&self) -> bool {
        !self.relations.is_empty()
    }

    pub fn property(&self) -> Option<&PropertyDefinition> {
        match &self.target {
            RefTarget::Property(property) => Some(property),
            RefTarget::Relation(_) => None,
        }
    }

    /// Dotted path, without filter suffix.
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }

    /// Requires the reference to name a stored column.
    pub fn expect_column(&self) -> Result<&PropertyDefinition, QueryError> {
        match self.property() {
            Some(property) if property.is_column() => Ok(property),
            Some(_) => Err(QueryError::invalid_reference(format!(
                "Property `{}` is computed and has no column",
                self.dotted()
            ))),
            None => Err(QueryError::invalid_reference(format!(
                "`{}` is a relation, not a property",
                self.dotted()
            ))),
        }
    }
}
