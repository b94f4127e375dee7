use serde::{Deserialize, Serialize};

use crate::error::Error;

/// SQL dialect the compiled statements are rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    Sqlite,
    Mysql,
}

impl Dialect {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(Dialect::Postgres),
            "sqlite" => Some(Dialect::Sqlite),
            "mysql" | "mariadb" => Some(Dialect::Mysql),
            _ => None,
        }
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::Sqlite => format!("?{}", index),
            Dialect::Mysql => "?".to_string(),
        }
    }

    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::Mysql => format!("`{}`", identifier.replace('`', "``")),
            _ => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }

    pub fn supports_ilike(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

/// Switches for the graph processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphSettings {
    /// Resolve per-relation graph-option overrides into relation paths.
    pub process_overrides: bool,
    /// Remember relations stripped from relate stubs so they can be put back
    /// onto the write result.
    pub restore_relations: bool,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            process_overrides: true,
            restore_relations: true,
        }
    }
}

/// Engine-wide settings.
///
/// ```json
/// { "dialect": "sqlite", "maxLimit": 500, "graph": { "restoreRelations": false } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub dialect: Dialect,
    pub graph: GraphSettings,
    /// Upper bound for `limit` and for the size of a `range` page.
    pub max_limit: Option<u64>,
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Deserialize(e.to_string()))
    }

    /// Defaults, overridden by `TAXIS_DIALECT` and `TAXIS_MAX_LIMIT` when set.
    pub fn from_env() -> Result<Self, Error> {
        let mut settings = Self::default();

        if let Ok(dialect) = std::env::var("TAXIS_DIALECT") {
            settings.dialect = Dialect::parse(&dialect)
                .ok_or_else(|| Error::Deserialize(format!("Unknown dialect `{}`", dialect)))?;
        }

        if let Ok(max_limit) = std::env::var("TAXIS_MAX_LIMIT") {
            let max_limit = max_limit
                .trim()
                .parse::<u64>()
                .map_err(|e| Error::Deserialize(format!("TAXIS_MAX_LIMIT: {}", e)))?;
            settings.max_limit = Some(max_limit);
        }

        Ok(settings)
    }

    pub fn clamp_limit(&self, limit: u64) -> u64 {
        match self.max_limit {
            Some(max) => limit.min(max),
            None => limit,
        }
    }
}
