use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use serde_json::{Number, Value};

use crate::error::QueryError;
use crate::model::PropertyType;
use crate::query::plan::{Comparison, Condition, Predicate, PredicateMethod};
use crate::query::property_ref::PropertyRef;

/// Built-in filter operators, selected by the `:name` suffix of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Eq,
    Ne,
    Not,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    ILike,
    NotILike,
    In,
    NotIn,
    Between,
    NotBetween,
    Null,
    NotNull,
    Empty,
    NotEmpty,
}

static OPERATORS: Lazy<HashMap<&'static str, FilterOperator>> = Lazy::new(|| {
    let mut operators: HashMap<&'static str, FilterOperator> = FilterOperator::ALL
        .iter()
        .map(|operator| (operator.name(), *operator))
        .collect();
    for (alias, operator) in [
        ("=", FilterOperator::Eq),
        ("!=", FilterOperator::Ne),
        ("<>", FilterOperator::Ne),
        ("<", FilterOperator::Lt),
        ("<=", FilterOperator::Lte),
        (">", FilterOperator::Gt),
        (">=", FilterOperator::Gte),
    ] {
        operators.insert(alias, operator);
    }
    operators
});

impl FilterOperator {
    pub const ALL: [FilterOperator; 19] = [
        FilterOperator::Eq,
        FilterOperator::Ne,
        FilterOperator::Not,
        FilterOperator::Lt,
        FilterOperator::Lte,
        FilterOperator::Gt,
        FilterOperator::Gte,
        FilterOperator::Like,
        FilterOperator::NotLike,
        FilterOperator::ILike,
        FilterOperator::NotILike,
        FilterOperator::In,
        FilterOperator::NotIn,
        FilterOperator::Between,
        FilterOperator::NotBetween,
        FilterOperator::Null,
        FilterOperator::NotNull,
        FilterOperator::Empty,
        FilterOperator::NotEmpty,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "ne",
            FilterOperator::Not => "not",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Like => "like",
            FilterOperator::NotLike => "notLike",
            FilterOperator::ILike => "iLike",
            FilterOperator::NotILike => "notILike",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "notIn",
            FilterOperator::Between => "between",
            FilterOperator::NotBetween => "notBetween",
            FilterOperator::Null => "null",
            FilterOperator::NotNull => "notNull",
            FilterOperator::Empty => "empty",
            FilterOperator::NotEmpty => "notEmpty",
        }
    }

    /// Looks up an operator by name or symbolic alias (`>=`, `<>`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        OPERATORS.get(name).copied()
    }

    /// Builds the predicate for `column`. `kind` drives value coercion.
    pub fn build(
        &self,
        column: &str,
        kind: Option<PropertyType>,
        value: &Value,
    ) -> Result<Predicate, QueryError> {
        let predicate = match self {
            FilterOperator::Eq if value.is_null() => Predicate::null(column),
            FilterOperator::Ne | FilterOperator::Not if value.is_null() => Predicate::not_null(column),
            FilterOperator::Eq => self.compare(column, kind, Comparison::Eq, value)?,
            FilterOperator::Ne => self.compare(column, kind, Comparison::Ne, value)?,
            FilterOperator::Lt => self.compare(column, kind, Comparison::Lt, value)?,
            FilterOperator::Lte => self.compare(column, kind, Comparison::Lte, value)?,
            FilterOperator::Gt => self.compare(column, kind, Comparison::Gt, value)?,
            FilterOperator::Gte => self.compare(column, kind, Comparison::Gte, value)?,
            FilterOperator::Not => Predicate::new(
                PredicateMethod::WhereNot,
                column,
                vec![coerce(column, kind, value)?],
            ),
            FilterOperator::Like => Predicate::compare(column, Comparison::Like, pattern(column, value)?),
            FilterOperator::NotLike => {
                Predicate::compare(column, Comparison::NotLike, pattern(column, value)?)
            }
            FilterOperator::ILike => Predicate::compare(column, Comparison::ILike, pattern(column, value)?),
            FilterOperator::NotILike => {
                Predicate::compare(column, Comparison::NotILike, pattern(column, value)?)
            }
            FilterOperator::In | FilterOperator::NotIn => {
                let values = split_list(value)
                    .ok_or_else(|| {
                        QueryError::unsupported_query(format!(
                            "Filter `{}` on `{}` expects a list",
                            self.name(),
                            column
                        ))
                    })?
                    .iter()
                    .map(|item| coerce(column, kind, item))
                    .collect::<Result<Vec<_>, _>>()?;
                let method = match self {
                    FilterOperator::In => PredicateMethod::WhereIn,
                    _ => PredicateMethod::WhereNotIn,
                };
                Predicate::new(method, column, values)
            }
            FilterOperator::Between | FilterOperator::NotBetween => {
                let (low, high) = bounds(column, kind, value)?;
                let method = match self {
                    FilterOperator::Between => PredicateMethod::WhereBetween,
                    _ => PredicateMethod::WhereNotBetween,
                };
                Predicate::new(method, column, vec![low, high])
            }
            FilterOperator::Null => Predicate::null(column),
            FilterOperator::NotNull => Predicate::not_null(column),
            FilterOperator::Empty => Predicate::compare(column, Comparison::Eq, Value::String(String::new())),
            FilterOperator::NotEmpty => {
                Predicate::compare(column, Comparison::Gt, Value::String(String::new()))
            }
        };

        Ok(predicate.typed(kind))
    }

    fn compare(
        &self,
        column: &str,
        kind: Option<PropertyType>,
        comparison: Comparison,
        value: &Value,
    ) -> Result<Predicate, QueryError> {
        if value.is_null() {
            return Err(QueryError::unsupported_query(format!(
                "Filter `{}` on `{}` requires a value",
                self.name(),
                column
            )));
        }
        Ok(Predicate::compare(column, comparison, coerce(column, kind, value)?))
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Caller-registered filter: receives the resolved reference and the raw
/// value, returns the condition to add.
pub type CustomFilter =
    Arc<dyn Fn(&PropertyRef, &Value) -> Result<Condition, QueryError> + Send + Sync>;

/// Built-in operators plus filters registered at runtime. A registered
/// filter shadows a built-in of the same name.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    custom: HashMap<String, CustomFilter>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&PropertyRef, &Value) -> Result<Condition, QueryError> + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), Arc::new(filter));
    }

    pub fn with_filter<F>(mut self, name: impl Into<String>, filter: F) -> Self
    where
        F: Fn(&PropertyRef, &Value) -> Result<Condition, QueryError> + Send + Sync + 'static,
    {
        self.register(name, filter);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.custom.contains_key(name) || FilterOperator::from_name(name).is_some()
    }

    /// Applies the filter named by the reference's suffix (`eq` if none).
    pub fn apply(&self, property_ref: &PropertyRef, value: &Value) -> Result<Condition, QueryError> {
        let name = property_ref.filter.as_deref().unwrap_or("eq");

        if let Some(filter) = self.custom.get(name) {
            return filter(property_ref, value);
        }

        let operator = FilterOperator::from_name(name).ok_or_else(|| {
            QueryError::invalid_filter(format!(
                "Invalid filter `{}` on `{}`",
                name,
                property_ref.dotted()
            ))
        })?;
        let property = property_ref.expect_column()?;

        operator
            .build(&property_ref.full_name(), Some(property.kind), value)
            .map(Condition::Predicate)
    }
}

/// `"a,b"` or `[a, b]` into a list; a lone scalar becomes a one-item list.
pub fn split_list(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Null | Value::Object(_) => None,
        Value::String(s) => Some(
            s.split(',')
                .map(|item| Value::String(item.trim().to_string()))
                .collect(),
        ),
        Value::Array(items) => Some(items.clone()),
        other => Some(vec![other.clone()]),
    }
}

fn bounds(column: &str, kind: Option<PropertyType>, value: &Value) -> Result<(Value, Value), QueryError> {
    let items = match value {
        Value::String(_) | Value::Array(_) => split_list(value).unwrap_or_default(),
        _ => Vec::new(),
    };
    let [low, high] = items.as_slice() else {
        return Err(QueryError::invalid_range(format!(
            "Range on `{}` needs exactly two bounds, got `{}`",
            column, value
        )));
    };

    let low = coerce(column, kind, low)?;
    let high = coerce(column, kind, high)?;

    let inverted = match (&low, &high) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() > b.as_f64(),
        (Value::String(a), Value::String(b)) => a > b,
        _ => false,
    };
    if inverted {
        return Err(QueryError::invalid_range(format!(
            "Range on `{}` has its lower bound above its upper bound",
            column
        )));
    }

    Ok((low, high))
}

fn pattern(column: &str, value: &Value) -> Result<Value, QueryError> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        _ => Err(QueryError::unsupported_query(format!(
            "Pattern filter on `{}` expects a string, got `{}`",
            column, value
        ))),
    }
}

/// Converts a raw parameter value into the property's type. Query strings
/// carry everything as text, so numbers, booleans and dates are parsed here.
pub fn coerce(column: &str, kind: Option<PropertyType>, value: &Value) -> Result<Value, QueryError> {
    let Some(kind) = kind else {
        return Ok(value.clone());
    };

    let invalid = || {
        QueryError::unsupported_query(format!(
            "Value `{}` is not a valid {:?} for `{}`",
            value, kind, column
        ))
    };

    let coerced = match (kind, value) {
        (PropertyType::Integer, Value::String(s)) => {
            Value::from(s.trim().parse::<i64>().map_err(|_| invalid())?)
        }
        (PropertyType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid)?,
        (PropertyType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Value::Bool(true),
            "false" | "0" | "no" => Value::Bool(false),
            _ => return Err(invalid()),
        },
        (PropertyType::Boolean, Value::Number(n)) => Value::Bool(n.as_f64() != Some(0.0)),
        (PropertyType::Date, Value::String(s)) => {
            Value::String(parse_date(s.trim()).ok_or_else(invalid)?.format("%Y-%m-%d").to_string())
        }
        (PropertyType::Timestamp, Value::String(s)) => Value::String(
            parse_timestamp(s.trim())
                .ok_or_else(invalid)?
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ),
        (PropertyType::String | PropertyType::Text, Value::Number(n)) => Value::String(n.to_string()),
        (PropertyType::String | PropertyType::Text, Value::Bool(b)) => Value::String(b.to_string()),
        _ => value.clone(),
    };

    Ok(coerced)
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::QueryErrorKind;

    #[test]
    fn aliases_resolve_to_operators() {
        assert_eq!(FilterOperator::from_name(">="), Some(FilterOperator::Gte));
        assert_eq!(FilterOperator::from_name("<>"), Some(FilterOperator::Ne));
        assert_eq!(FilterOperator::from_name("notILike"), Some(FilterOperator::NotILike));
        assert_eq!(FilterOperator::from_name("fuzzy"), None);
    }

    #[test]
    fn eq_null_becomes_null_check() {
        let predicate = FilterOperator::Eq.build("people.age", None, &Value::Null).unwrap();
        assert_eq!(predicate.method, PredicateMethod::WhereNull);
        assert!(predicate.args.is_empty());

        let predicate = FilterOperator::Not.build("people.age", None, &Value::Null).unwrap();
        assert_eq!(predicate.method, PredicateMethod::WhereNotNull);
    }

    #[test]
    fn between_accepts_comma_string_and_coerces() {
        let predicate = FilterOperator::Between
            .build("people.age", Some(PropertyType::Integer), &json!("18, 65"))
            .unwrap();
        assert_eq!(predicate.method, PredicateMethod::WhereBetween);
        assert_eq!(predicate.args, vec![json!(18), json!(65)]);
    }

    #[test]
    fn between_rejects_bad_bounds() {
        let err = FilterOperator::Between
            .build("people.age", Some(PropertyType::Integer), &json!("65,18"))
            .unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::InvalidRange);

        let err = FilterOperator::NotBetween
            .build("people.age", Some(PropertyType::Integer), &json!([1, 2, 3]))
            .unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::InvalidRange);
    }

    #[test]
    fn empty_and_not_empty_compare_with_empty_string() {
        let empty = FilterOperator::Empty.build("people.name", None, &Value::Null).unwrap();
        assert_eq!(empty.method, PredicateMethod::Where(Comparison::Eq));
        assert_eq!(empty.args, vec![json!("")]);

        let not_empty = FilterOperator::NotEmpty.build("people.name", None, &Value::Null).unwrap();
        assert_eq!(not_empty.method, PredicateMethod::Where(Comparison::Gt));
    }

    #[test]
    fn coercion_follows_property_type() {
        assert_eq!(coerce("c", Some(PropertyType::Integer), &json!("42")).unwrap(), json!(42));
        assert_eq!(coerce("c", Some(PropertyType::Boolean), &json!("false")).unwrap(), json!(false));
        assert_eq!(
            coerce("c", Some(PropertyType::Timestamp), &json!("2024-01-02")).unwrap(),
            json!("2024-01-02T00:00:00Z")
        );
        assert_eq!(coerce("c", Some(PropertyType::String), &json!(7)).unwrap(), json!("7"));

        let err = coerce("c", Some(PropertyType::Integer), &json!("abc")).unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::UnsupportedQuery);
    }
}
