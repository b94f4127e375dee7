use std::fmt::Display;

use serde::Serialize;
use thiserror::Error;

/// Kind tag carried by every [`QueryError`].
///
/// All kinds are caller-input errors raised while a query plan is being
/// built, before anything reaches the database. None of them are retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryErrorKind {
    /// A query key or reference that is not in the current allow-list.
    NotAllowed,
    /// A path segment that does not resolve to a known property or relation.
    InvalidReference,
    /// An unrecognized filter-operator suffix.
    InvalidFilter,
    /// Malformed or inverted `range` / `between` bounds.
    InvalidRange,
    /// A parameter value of a shape the handler cannot interpret.
    UnsupportedQuery,
}

impl QueryErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryErrorKind::NotAllowed => "NotAllowed",
            QueryErrorKind::InvalidReference => "InvalidReference",
            QueryErrorKind::InvalidFilter => "InvalidFilter",
            QueryErrorKind::InvalidRange => "InvalidRange",
            QueryErrorKind::UnsupportedQuery => "UnsupportedQuery",
        }
    }
}

impl Display for QueryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured query-build error: a kind tag, a message naming the offending
/// key or value, and the sub-errors that led to it (if any).
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct QueryError {
    #[serde(rename = "type")]
    pub kind: QueryErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<QueryError>,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::NotAllowed, message)
    }

    pub fn invalid_reference(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::InvalidReference, message)
    }

    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::InvalidFilter, message)
    }

    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::InvalidRange, message)
    }

    pub fn unsupported_query(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::UnsupportedQuery, message)
    }

    pub fn with_errors(mut self, errors: Vec<QueryError>) -> Self {
        self.errors = errors;
        self
    }

    pub fn kind(&self) -> QueryErrorKind {
        self.kind
    }
}

/// Crate-wide error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Unknown relation `{relation}` on model `{model}`")]
    UnknownRelation { model: String, relation: String },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    #[error("Type mismatch")]
    TypeMismatch,
}

impl Error {
    /// The query error kind, when this error was raised while building a plan.
    pub fn query_kind(&self) -> Option<QueryErrorKind> {
        match self {
            Error::Query(err) => Some(err.kind),
            _ => None,
        }
    }
}
