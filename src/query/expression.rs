use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::QueryError;
use crate::model::{ModelDefinition, Schema};

/// Eager-load tree: `[pets(onlyDogs).toys, parent.[pets, children]]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelationExpression {
    pub children: BTreeMap<String, RelationNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationNode {
    pub name: String,
    pub modifiers: Vec<String>,
    pub children: BTreeMap<String, RelationNode>,
    /// Column projection from `pick` / `omit`, `None` for all columns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

impl RelationNode {
    fn new(name: String) -> Self {
        Self {
            name,
            modifiers: Vec::new(),
            children: BTreeMap::new(),
            columns: None,
        }
    }

    fn merge(&mut self, other: RelationNode) {
        for modifier in other.modifiers {
            if !self.modifiers.contains(&modifier) {
                self.modifiers.push(modifier);
            }
        }
        merge_children(&mut self.children, other.children);
    }
}

fn merge_children(into: &mut BTreeMap<String, RelationNode>, from: BTreeMap<String, RelationNode>) {
    for (name, node) in from {
        match into.get_mut(&name) {
            Some(existing) => existing.merge(node),
            None => {
                into.insert(name, node);
            }
        }
    }
}

impl RelationExpression {
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        let mut parser = Parser {
            input,
            chars: input.char_indices().peekable(),
            depth: 0,
        };
        let nodes = parser.list(None)?;
        parser.skip_whitespace();
        if let Some(c) = parser.peek() {
            return Err(parser.error(&format!("unexpected `{}`", c)));
        }

        let mut expression = RelationExpression::default();
        merge_children(
            &mut expression.children,
            nodes.into_iter().map(|node| (node.name.clone(), node)).collect(),
        );
        Ok(expression)
    }

    pub fn merge(&mut self, other: RelationExpression) {
        merge_children(&mut self.children, other.children);
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Every node must name a relation of the model it sits under.
    pub fn validate(&self, schema: &Schema, model: &ModelDefinition) -> Result<(), QueryError> {
        validate_nodes(schema, model, &self.children)
    }
}

fn validate_nodes(
    schema: &Schema,
    model: &ModelDefinition,
    nodes: &BTreeMap<String, RelationNode>,
) -> Result<(), QueryError> {
    for node in nodes.values() {
        let relation = model.relation(&node.name).ok_or_else(|| {
            QueryError::invalid_reference(format!(
                "Unknown relation `{}` on `{}`",
                node.name, model.name
            ))
        })?;
        let related = schema.model(&relation.model).ok_or_else(|| {
            QueryError::invalid_reference(format!("Unknown model `{}`", relation.model))
        })?;
        validate_nodes(schema, related, &node.children)?;
    }
    Ok(())
}

/// Deepest `[` / `.` nesting accepted in one expression.
const MAX_DEPTH: usize = 64;

struct Parser<'s> {
    input: &'s str,
    chars: std::iter::Peekable<std::str::CharIndices<'s>>,
    depth: usize,
}

impl Parser<'_> {
    fn error(&self, detail: &str) -> QueryError {
        QueryError::unsupported_query(format!(
            "Invalid relation expression `{}`: {}",
            self.input, detail
        ))
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        self.chars.next_if(|(_, c)| *c == expected).is_some()
    }

    // items separated by `,` until `close` (or end of input)
    fn list(&mut self, close: Option<char>) -> Result<Vec<RelationNode>, QueryError> {
        let mut nodes = Vec::new();
        loop {
            self.skip_whitespace();
            match (self.peek(), close) {
                (None, None) => break,
                (None, Some(c)) => return Err(self.error(&format!("missing `{}`", c))),
                (Some(c), Some(close)) if c == close => break,
                _ => {}
            }
            nodes.extend(self.item()?);
            if !self.eat(',') {
                break;
            }
        }
        if let Some(close) = close {
            if !self.eat(close) {
                return Err(self.error(&format!("missing `{}`", close)));
            }
        }
        Ok(nodes)
    }

    fn item(&mut self) -> Result<Vec<RelationNode>, QueryError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let nodes = self.nested_item();
        self.depth -= 1;
        nodes
    }

    fn nested_item(&mut self) -> Result<Vec<RelationNode>, QueryError> {
        if self.eat('[') {
            return self.list(Some(']'));
        }

        let name = self.identifier();
        if name.is_empty() {
            return Err(self.error("expected a relation name"));
        }
        let mut node = RelationNode::new(name);

        if self.eat('(') {
            let mut raw = String::new();
            loop {
                match self.chars.next() {
                    Some((_, ')')) => break,
                    Some((_, c)) => raw.push(c),
                    None => return Err(self.error("missing `)`")),
                }
            }
            node.modifiers = raw
                .split(',')
                .map(str::trim)
                .filter(|modifier| !modifier.is_empty())
                .map(String::from)
                .collect();
        }

        if self.eat('.') {
            merge_children(
                &mut node.children,
                self.item()?
                    .into_iter()
                    .map(|child| (child.name.clone(), child))
                    .collect(),
            );
        }

        Ok(vec![node])
    }

    fn identifier(&mut self) -> String {
        self.skip_whitespace();
        let mut name = String::new();
        while let Some((_, c)) = self
            .chars
            .next_if(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '$')
        {
            name.push(c);
        }
        name
    }
}

impl fmt::Display for RelationExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_nodes(f, &self.children)
    }
}

fn write_nodes(f: &mut fmt::Formatter<'_>, nodes: &BTreeMap<String, RelationNode>) -> fmt::Result {
    if nodes.len() == 1 {
        if let Some(node) = nodes.values().next() {
            return write_node(f, node);
        }
    }
    f.write_str("[")?;
    for (i, node) in nodes.values().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_node(f, node)?;
    }
    f.write_str("]")
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &RelationNode) -> fmt::Result {
    f.write_str(&node.name)?;
    if !node.modifiers.is_empty() {
        write!(f, "({})", node.modifiers.join(", "))?;
    }
    if !node.children.is_empty() {
        f.write_str(".")?;
        write_nodes(f, &node.children)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryErrorKind;

    #[test]
    fn parses_nested_lists_and_modifiers() {
        let expression = RelationExpression::parse("[pets(onlyDogs, young).toys, parent.[pets, children]]").unwrap();

        let pets = &expression.children["pets"];
        assert_eq!(pets.modifiers, vec!["onlyDogs", "young"]);
        assert!(pets.children.contains_key("toys"));

        let parent = &expression.children["parent"];
        assert_eq!(parent.children.keys().collect::<Vec<_>>(), vec!["children", "pets"]);
        assert_eq!(
            expression.to_string(),
            "[parent.[children, pets], pets(onlyDogs, young).toys]"
        );
    }

    #[test]
    fn merging_unions_paths() {
        let mut expression = RelationExpression::parse("pets.toys").unwrap();
        expression.merge(RelationExpression::parse("pets.owner, parent").unwrap());

        assert_eq!(expression.to_string(), "[parent, pets.[owner, toys]]");
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for input in ["[pets", "pets.", "pets(x", "pets]"] {
            let err = RelationExpression::parse(input).unwrap_err();
            assert_eq!(err.kind(), QueryErrorKind::UnsupportedQuery, "{}", input);
        }
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let err = RelationExpression::parse(&"[".repeat(200_000)).unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::UnsupportedQuery);

        let chain = vec!["pets"; 100].join(".");
        let err = RelationExpression::parse(&chain).unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::UnsupportedQuery);

        let chain = vec!["pets"; 10].join(".");
        assert!(RelationExpression::parse(&chain).is_ok());
    }
}
