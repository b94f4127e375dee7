use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::error::QueryError;
use crate::query::QueryBuilder;
use crate::query::filters::{FilterRegistry, split_list};
use crate::query::plan::JoinKind;

/// Structural query parameters. Keys without a handler are filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryHandler {
    Where,
    Eager,
    Scope,
    Order,
    Range,
    Limit,
    Offset,
    Pick,
    Omit,
    Join(JoinKind),
}

static HANDLERS: Lazy<HashMap<&'static str, QueryHandler>> = Lazy::new(|| {
    let mut handlers = HashMap::from([
        ("where", QueryHandler::Where),
        ("eager", QueryHandler::Eager),
        ("withGraph", QueryHandler::Eager),
        ("scope", QueryHandler::Scope),
        ("order", QueryHandler::Order),
        ("orderBy", QueryHandler::Order),
        ("range", QueryHandler::Range),
        ("limit", QueryHandler::Limit),
        ("offset", QueryHandler::Offset),
        ("pick", QueryHandler::Pick),
        ("omit", QueryHandler::Omit),
    ]);
    for kind in JoinKind::ALL {
        handlers.insert(kind.param(), QueryHandler::Join(kind));
        // short form: `innerJoin`, `leftOuterJoin`, ...
        handlers.insert(kind.param().trim_end_matches("Relation"), QueryHandler::Join(kind));
    }
    handlers
});

impl QueryHandler {
    pub fn from_key(key: &str) -> Option<Self> {
        HANDLERS.get(key).copied()
    }

    pub fn key(&self) -> &'static str {
        match self {
            QueryHandler::Where => "where",
            QueryHandler::Eager => "eager",
            QueryHandler::Scope => "scope",
            QueryHandler::Order => "order",
            QueryHandler::Range => "range",
            QueryHandler::Limit => "limit",
            QueryHandler::Offset => "offset",
            QueryHandler::Pick => "pick",
            QueryHandler::Omit => "omit",
            QueryHandler::Join(kind) => kind.param(),
        }
    }

    pub fn apply(&self, builder: &mut QueryBuilder<'_>, value: &Value) -> Result<(), QueryError> {
        let key = self.key();
        match self {
            QueryHandler::Where => {
                builder.where_params(value)?;
            }
            QueryHandler::Eager => {
                for expression in strings(key, value)? {
                    builder.eager(&expression)?;
                }
            }
            QueryHandler::Scope => {
                builder.with_scope(comma_list(key, value)?)?;
            }
            QueryHandler::Order => {
                builder.order(&comma_list(key, value)?.join(","))?;
            }
            QueryHandler::Range => {
                let (start, end) = parse_range(value)?;
                builder.range(start, end)?;
            }
            QueryHandler::Limit => {
                builder.limit(parse_count(key, value)?);
            }
            QueryHandler::Offset => {
                builder.offset(parse_count(key, value)?);
            }
            QueryHandler::Pick => {
                for projection in strings(key, value)? {
                    builder.pick(&projection)?;
                }
            }
            QueryHandler::Omit => {
                for projection in strings(key, value)? {
                    builder.omit(&projection)?;
                }
            }
            QueryHandler::Join(kind) => {
                for path in comma_list(key, value)? {
                    builder.join_relation(*kind, &path)?;
                }
            }
        }
        Ok(())
    }
}

pub type CustomHandler =
    Arc<dyn Fn(&mut QueryBuilder<'_>, &str, &Value) -> Result<(), QueryError> + Send + Sync>;

/// Handlers registered for additional query parameters. A registered
/// handler shadows a built-in one with the same key.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    custom: HashMap<String, CustomHandler>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, key: impl Into<String>, handler: F)
    where
        F: Fn(&mut QueryBuilder<'_>, &str, &Value) -> Result<(), QueryError> + Send + Sync + 'static,
    {
        self.custom.insert(key.into(), Arc::new(handler));
    }

    pub fn with_handler<F>(mut self, key: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut QueryBuilder<'_>, &str, &Value) -> Result<(), QueryError> + Send + Sync + 'static,
    {
        self.register(key, handler);
        self
    }

    pub fn get(&self, key: &str) -> Option<&CustomHandler> {
        self.custom.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.custom.contains_key(key) || QueryHandler::from_key(key).is_some()
    }
}

/// A `where` entry flattened to `path[:filter]` and its value.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereFilter {
    pub key: String,
    pub value: Value,
}

impl fmt::Display for WhereFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.key, self.value)
    }
}

/// Flattens a `where` value into filter entries.
///
/// Objects nest by property path, and a key naming a registered filter turns
/// the enclosing path into `path:filter`. Strings take the form
/// `ref[:filter]=value`. Array items are flattened one by one.
pub fn flatten_where(value: &Value, filters: &FilterRegistry) -> Result<Vec<WhereFilter>, QueryError> {
    let mut entries = Vec::new();
    flatten_into(&mut entries, "", value, filters)?;
    Ok(entries)
}

fn flatten_into(
    entries: &mut Vec<WhereFilter>,
    path: &str,
    value: &Value,
    filters: &FilterRegistry,
) -> Result<(), QueryError> {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                if filters.contains(key) {
                    if path.is_empty() {
                        return Err(QueryError::unsupported_query(format!(
                            "Filter `{}` needs a property to apply to",
                            key
                        )));
                    }
                    entries.push(WhereFilter {
                        key: format!("{}:{}", path, key),
                        value: value.clone(),
                    });
                } else if path.is_empty() {
                    flatten_into(entries, key, value, filters)?;
                } else {
                    flatten_into(entries, &format!("{}.{}", path, key), value, filters)?;
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten_into(entries, path, item, filters)?;
            }
        }
        Value::String(s) if path.is_empty() => {
            entries.push(parse_where_string(s)?);
        }
        _ if path.is_empty() => {
            return Err(QueryError::unsupported_query(format!(
                "Unsupported where value `{}`",
                value
            )));
        }
        _ => entries.push(WhereFilter {
            key: path.to_string(),
            value: value.clone(),
        }),
    }
    Ok(())
}

// `ref[:op]=value`; symbolic operators (`>=`, `!=`, ...) may stand in for the `=`
fn parse_where_string(s: &str) -> Result<WhereFilter, QueryError> {
    let head = s.find('=').map_or(s, |eq| &s[..eq]);
    let (key, value) = match head.find(':') {
        Some(colon) => {
            let rest = &s[colon + 1..];
            match symbolic_operator(rest) {
                Some(operator) => {
                    let after = &rest[operator.len()..];
                    let value = match after.strip_prefix('=') {
                        Some(value) => Value::String(value.to_string()),
                        None if after.is_empty() => Value::Null,
                        None => Value::String(after.to_string()),
                    };
                    (s[..colon + 1 + operator.len()].trim(), value)
                }
                None => split_assignment(s),
            }
        }
        None => split_assignment(s),
    };
    if key.is_empty() {
        return Err(QueryError::unsupported_query(format!(
            "Unsupported where value `{}`",
            s
        )));
    }
    Ok(WhereFilter {
        key: key.to_string(),
        value,
    })
}

fn split_assignment(s: &str) -> (&str, Value) {
    match s.split_once('=') {
        Some((key, value)) => (key.trim(), Value::String(value.to_string())),
        None => (s.trim(), Value::Null),
    }
}

fn symbolic_operator(rest: &str) -> Option<&'static str> {
    [">=", "<=", "!=", "<>", "=", "<", ">"]
        .into_iter()
        .find(|operator| rest.starts_with(operator))
}

fn strings(key: &str, value: &Value) -> Result<Vec<String>, QueryError> {
    let unsupported = || {
        QueryError::unsupported_query(format!(
            "Parameter `{}` expects a string or a list of strings, got `{}`",
            key, value
        ))
    };
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(String::from).ok_or_else(unsupported))
            .collect(),
        _ => Err(unsupported()),
    }
}

fn comma_list(key: &str, value: &Value) -> Result<Vec<String>, QueryError> {
    Ok(strings(key, value)?
        .iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect())
}

fn parse_count(key: &str, value: &Value) -> Result<u64, QueryError> {
    let count = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    count.ok_or_else(|| {
        QueryError::unsupported_query(format!(
            "Parameter `{}` expects a non-negative integer, got `{}`",
            key, value
        ))
    })
}

/// `"start,end"` or `[start, end]`, inclusive.
fn parse_range(value: &Value) -> Result<(u64, u64), QueryError> {
    let invalid = || QueryError::invalid_range(format!("Invalid range `{}`", value));

    let items = match value {
        Value::String(_) | Value::Array(_) => split_list(value).unwrap_or_default(),
        _ => return Err(invalid()),
    };
    let bounds = items
        .iter()
        .map(|item| match item {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(invalid)?;

    match bounds.as_slice() {
        [start, end] if start <= end => Ok((*start, *end)),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::QueryErrorKind;

    fn flatten(value: Value) -> Vec<String> {
        flatten_where(&value, &FilterRegistry::new())
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn object_form_nests_paths_and_filters() {
        assert_eq!(
            flatten(json!({ "firstName": { "like": "Jo%" }, "lastName": "%oe" })),
            vec![r#"firstName:like = "Jo%""#, r#"lastName = "%oe""#]
        );
        assert_eq!(
            flatten(json!({ "author": { "name": { "in": ["a", "b"] } } })),
            vec![r#"author.name:in = ["a","b"]"#]
        );
    }

    #[test]
    fn string_and_array_forms() {
        assert_eq!(
            flatten(json!(["age:gte=18", "deletedAt:null"])),
            vec![r#"age:gte = "18""#, "deletedAt:null = null"]
        );
    }

    #[test]
    fn string_form_keeps_symbolic_operators() {
        assert_eq!(
            flatten(json!(["age:>=18", "age:!=5", "age:<=65", "age:>=x=y", "name:like=a:b"])),
            vec![
                r#"age:>= = "18""#,
                r#"age:!= = "5""#,
                r#"age:<= = "65""#,
                r#"age:>= = "x=y""#,
                r#"name:like = "a:b""#,
            ]
        );
    }

    #[test]
    fn top_level_scalars_are_rejected() {
        let err = flatten_where(&json!(5), &FilterRegistry::new()).unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::UnsupportedQuery);

        let err = flatten_where(&json!({ "like": "x" }), &FilterRegistry::new()).unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::UnsupportedQuery);
    }

    #[test]
    fn ranges_parse_inclusive_bounds() {
        assert_eq!(parse_range(&json!("2,4")).unwrap(), (2, 4));
        assert_eq!(parse_range(&json!([0, 9])).unwrap(), (0, 9));
        assert_eq!(parse_range(&json!("5,3")).unwrap_err().kind(), QueryErrorKind::InvalidRange);
        assert_eq!(parse_range(&json!("1")).unwrap_err().kind(), QueryErrorKind::InvalidRange);
    }

    #[test]
    fn handler_keys() {
        assert_eq!(QueryHandler::from_key("eager"), Some(QueryHandler::Eager));
        assert_eq!(
            QueryHandler::from_key("innerJoinRelation"),
            Some(QueryHandler::Join(JoinKind::Inner))
        );
        assert_eq!(
            QueryHandler::from_key("leftOuterJoin"),
            Some(QueryHandler::Join(JoinKind::LeftOuter))
        );
        assert_eq!(QueryHandler::from_key("firstName"), None);
    }
}
