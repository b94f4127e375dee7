use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::model::PropertyType;
use crate::query::expression::RelationExpression;
use crate::query::projection::Projection;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    #[default]
    Read,
    Count,
    Insert,
    Update,
    Patch,
    Delete,
}

impl Operation {
    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::Read | Operation::Count)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "asc" => Some(Direction::Asc),
            "desc" => Some(Direction::Desc),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    ILike,
    NotILike,
}

impl Comparison {
    pub fn sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Like => "LIKE",
            Comparison::NotLike => "NOT LIKE",
            Comparison::ILike => "ILIKE",
            Comparison::NotILike => "NOT ILIKE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PredicateMethod {
    Where(Comparison),
    WhereNot,
    WhereNull,
    WhereNotNull,
    WhereIn,
    WhereNotIn,
    WhereBetween,
    WhereNotBetween,
}

impl PredicateMethod {
    pub fn name(&self) -> &'static str {
        match self {
            PredicateMethod::Where(_) => "where",
            PredicateMethod::WhereNot => "whereNot",
            PredicateMethod::WhereNull => "whereNull",
            PredicateMethod::WhereNotNull => "whereNotNull",
            PredicateMethod::WhereIn => "whereIn",
            PredicateMethod::WhereNotIn => "whereNotIn",
            PredicateMethod::WhereBetween => "whereBetween",
            PredicateMethod::WhereNotBetween => "whereNotBetween",
        }
    }
}

/// One column predicate: a method plus its arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    pub method: PredicateMethod,
    pub column: String,
    pub args: Vec<Value>,
    /// Type of the column, when it is a known property.
    #[serde(skip)]
    pub kind: Option<PropertyType>,
}

impl Predicate {
    pub fn new(method: PredicateMethod, column: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method,
            column: column.into(),
            args,
            kind: None,
        }
    }

    pub fn compare(column: impl Into<String>, comparison: Comparison, value: Value) -> Self {
        Self::new(PredicateMethod::Where(comparison), column, vec![value])
    }

    pub fn null(column: impl Into<String>) -> Self {
        Self::new(PredicateMethod::WhereNull, column, Vec::new())
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Self::new(PredicateMethod::WhereNotNull, column, Vec::new())
    }

    pub fn typed(mut self, kind: Option<PropertyType>) -> Self {
        self.kind = kind;
        self
    }
}

/// Filter tree. Top-level conditions of a plan are AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
    Predicate(Predicate),
    /// SQL fragment with `?` placeholders, one per binding.
    Raw { sql: String, bindings: Vec<Value> },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn any(mut conditions: Vec<Condition>) -> Condition {
        if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Condition::Or(conditions)
        }
    }

    pub fn all(mut conditions: Vec<Condition>) -> Condition {
        if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Condition::And(conditions)
        }
    }
}

impl From<Predicate> for Condition {
    fn from(predicate: Predicate) -> Self {
        Condition::Predicate(predicate)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinKind {
    Join,
    Inner,
    #[default]
    Left,
    Right,
    Outer,
    LeftOuter,
    RightOuter,
    FullOuter,
}

impl JoinKind {
    pub const ALL: [JoinKind; 8] = [
        JoinKind::Join,
        JoinKind::Inner,
        JoinKind::Left,
        JoinKind::Right,
        JoinKind::Outer,
        JoinKind::LeftOuter,
        JoinKind::RightOuter,
        JoinKind::FullOuter,
    ];

    /// Query parameter that selects this join.
    pub fn param(&self) -> &'static str {
        match self {
            JoinKind::Join => "joinRelation",
            JoinKind::Inner => "innerJoinRelation",
            JoinKind::Left => "leftJoinRelation",
            JoinKind::Right => "rightJoinRelation",
            JoinKind::Outer => "outerJoinRelation",
            JoinKind::LeftOuter => "leftOuterJoinRelation",
            JoinKind::RightOuter => "rightOuterJoinRelation",
            JoinKind::FullOuter => "fullOuterJoinRelation",
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            JoinKind::Join | JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Outer | JoinKind::FullOuter => "FULL OUTER JOIN",
            JoinKind::LeftOuter => "LEFT OUTER JOIN",
            JoinKind::RightOuter => "RIGHT OUTER JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinItem {
    pub kind: JoinKind,
    pub relation_path: Vec<String>,
}

impl JoinItem {
    /// Table alias of the last hop: `author:publisher`.
    pub fn alias(&self) -> String {
        self.relation_path.join(":")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    pub column: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectItem {
    pub column: String,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Pagination {
    LimitOffset {
        limit: Option<u64>,
        offset: Option<u64>,
    },
    /// Inclusive row range. The total row count is reported alongside the page.
    Range { start: u64, end: u64 },
}

impl Pagination {
    pub fn limit(&self) -> Option<u64> {
        match self {
            Pagination::LimitOffset { limit, .. } => *limit,
            Pagination::Range { start, end } => Some((end - start).saturating_add(1)),
        }
    }

    pub fn offset(&self) -> Option<u64> {
        match self {
            Pagination::LimitOffset { offset, .. } => *offset,
            Pagination::Range { start, .. } => Some(*start),
        }
    }

    pub fn wants_total(&self) -> bool {
        matches!(self, Pagination::Range { .. })
    }
}

/// Backend-neutral description of a query, ready to be rendered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub model: String,
    pub table: String,
    pub operation: Operation,
    pub conditions: Vec<Condition>,
    pub eager: Option<RelationExpression>,
    /// Scopes applied, default scope first.
    pub scopes: Vec<String>,
    pub order: Vec<OrderItem>,
    pub selects: Vec<SelectItem>,
    /// Root columns to select. `None` selects every column.
    pub columns: Option<Vec<String>>,
    pub joins: Vec<JoinItem>,
    pub pagination: Option<Pagination>,
    pub projections: BTreeMap<String, Projection>,
}

impl QueryPlan {
    pub fn limit(&self) -> Option<u64> {
        self.pagination.as_ref().and_then(Pagination::limit)
    }

    pub fn offset(&self) -> Option<u64> {
        self.pagination.as_ref().and_then(Pagination::offset)
    }
}
