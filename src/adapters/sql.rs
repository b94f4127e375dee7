use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::config::Dialect;
use crate::error::Error;
use crate::model::{ModelDefinition, PropertyType, RelationDefinition, Schema};
use crate::query::{Comparison, Condition, Predicate, PredicateMethod, QueryPlan};

/// Column carrying the owning row's key in rows loaded through a join table.
pub const OWNER_KEY: &str = "__owner_key";

const THROUGH_ALIAS: &str = "__through";

/// Bound parameter. `kind` is the type of the column it is compared with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<PropertyType>,
}

/// Rendered SQL for one model, with its parameters in bind order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub model: String,
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn values(&self) -> Vec<&Value> {
        self.params.iter().map(|param| &param.value).collect()
    }
}

struct Renderer<'a> {
    schema: &'a Schema,
    dialect: Dialect,
    params: Vec<Param>,
}

impl<'a> Renderer<'a> {
    fn new(schema: &'a Schema, dialect: Dialect) -> Self {
        Self {
            schema,
            dialect,
            params: Vec::new(),
        }
    }

    fn q(&self, identifier: &str) -> String {
        self.dialect.quote(identifier)
    }

    // `table.column` or a bare alias
    fn column(&self, column: &str) -> String {
        match column.split_once('.') {
            Some((table, name)) => format!("{}.{}", self.q(table), self.q(name)),
            None => self.q(column),
        }
    }

    fn bind(&mut self, value: Value, kind: Option<PropertyType>) -> String {
        self.params.push(Param { value, kind });
        let placeholder = self.dialect.placeholder(self.params.len());
        match (self.dialect, kind) {
            (Dialect::Postgres, Some(PropertyType::Date)) => format!("{}::date", placeholder),
            (Dialect::Postgres, Some(PropertyType::Timestamp)) => format!("{}::timestamptz", placeholder),
            (Dialect::Postgres, Some(PropertyType::Json)) => format!("{}::jsonb", placeholder),
            _ => placeholder,
        }
    }

    fn joins(&self, plan: &QueryPlan, root: &ModelDefinition) -> Result<Vec<String>, Error> {
        let mut seen = HashSet::new();
        let mut joins = Vec::new();

        for join in &plan.joins {
            let kind = join.kind.sql();
            let mut model = root;
            let mut owner = self.q(&plan.table);

            for (i, name) in join.relation_path.iter().enumerate() {
                let relation = model.relation(name).ok_or_else(|| Error::UnknownRelation {
                    model: model.name.clone(),
                    relation: name.clone(),
                })?;
                let related = self.schema.related(relation)?;
                let alias = join.relation_path[..=i].join(":");
                let quoted = self.q(&alias);

                if seen.insert(alias.clone()) {
                    match &relation.through {
                        Some(through) => {
                            let through_alias = self.q(&format!("{}_through", alias));
                            joins.push(format!(
                                "{} {} AS {} ON {}.{} = {}.{}",
                                kind,
                                self.q(&through.table),
                                through_alias,
                                owner,
                                self.q(&relation.from),
                                through_alias,
                                self.q(&through.from)
                            ));
                            joins.push(format!(
                                "{} {} AS {} ON {}.{} = {}.{}",
                                kind,
                                self.q(related.table_name()),
                                quoted,
                                through_alias,
                                self.q(&through.to),
                                quoted,
                                self.q(&relation.to)
                            ));
                        }
                        None => joins.push(format!(
                            "{} {} AS {} ON {}.{} = {}.{}",
                            kind,
                            self.q(related.table_name()),
                            quoted,
                            owner,
                            self.q(&relation.from),
                            quoted,
                            self.q(&relation.to)
                        )),
                    }
                }

                owner = quoted;
                model = related;
            }
        }

        Ok(joins)
    }

    fn condition(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::Predicate(predicate) => self.predicate(predicate),
            Condition::Raw { sql, bindings } => {
                let mut bindings = bindings.iter().peekable();
                let mut rendered = String::with_capacity(sql.len());
                for c in sql.chars() {
                    match (c, bindings.next_if(|_| c == '?')) {
                        (_, Some(value)) => {
                            let placeholder = self.bind(value.clone(), None);
                            rendered.push_str(&placeholder);
                        }
                        (c, None) => rendered.push(c),
                    }
                }
                format!("({})", rendered)
            }
            Condition::And(conditions) => self.group(conditions, " AND ", "1 = 1"),
            Condition::Or(conditions) => self.group(conditions, " OR ", "1 = 0"),
        }
    }

    fn group(&mut self, conditions: &[Condition], separator: &str, empty: &str) -> String {
        if conditions.is_empty() {
            return empty.to_string();
        }
        let parts: Vec<String> = conditions.iter().map(|c| self.condition(c)).collect();
        format!("({})", parts.join(separator))
    }

    fn predicate(&mut self, predicate: &Predicate) -> String {
        let column = self.column(&predicate.column);
        let arg = |index: usize| predicate.args.get(index).cloned().unwrap_or(Value::Null);

        match predicate.method {
            PredicateMethod::Where(comparison @ (Comparison::ILike | Comparison::NotILike))
                if !self.dialect.supports_ilike() =>
            {
                let operator = match comparison {
                    Comparison::ILike => "LIKE",
                    _ => "NOT LIKE",
                };
                let value = self.bind(arg(0), None);
                format!("LOWER({}) {} LOWER({})", column, operator, value)
            }
            PredicateMethod::Where(
                comparison @ (Comparison::Like
                | Comparison::NotLike
                | Comparison::ILike
                | Comparison::NotILike),
            ) => {
                let value = self.bind(arg(0), None);
                format!("{} {} {}", column, comparison.sql(), value)
            }
            PredicateMethod::Where(comparison) => {
                let value = self.bind(arg(0), predicate.kind);
                format!("{} {} {}", column, comparison.sql(), value)
            }
            PredicateMethod::WhereNot => {
                let value = self.bind(arg(0), predicate.kind);
                format!("NOT ({} = {})", column, value)
            }
            PredicateMethod::WhereNull => format!("{} IS NULL", column),
            PredicateMethod::WhereNotNull => format!("{} IS NOT NULL", column),
            PredicateMethod::WhereIn | PredicateMethod::WhereNotIn => {
                let negated = predicate.method == PredicateMethod::WhereNotIn;
                if predicate.args.is_empty() {
                    return if negated { "1 = 1" } else { "1 = 0" }.to_string();
                }
                let placeholders: Vec<String> = predicate
                    .args
                    .iter()
                    .map(|value| self.bind(value.clone(), predicate.kind))
                    .collect();
                format!(
                    "{} {} ({})",
                    column,
                    if negated { "NOT IN" } else { "IN" },
                    placeholders.join(", ")
                )
            }
            PredicateMethod::WhereBetween | PredicateMethod::WhereNotBetween => {
                let low = self.bind(arg(0), predicate.kind);
                let high = self.bind(arg(1), predicate.kind);
                let operator = match predicate.method {
                    PredicateMethod::WhereBetween => "BETWEEN",
                    _ => "NOT BETWEEN",
                };
                format!("{} {} {} AND {}", column, operator, low, high)
            }
        }
    }

    fn where_clause(&mut self, conditions: &[Condition], extra: Vec<Predicate>) -> String {
        let mut parts: Vec<String> = conditions.iter().map(|c| self.condition(c)).collect();
        parts.extend(extra.iter().map(|p| self.predicate(p)));
        if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        }
    }

    fn order_clause(&self, plan: &QueryPlan) -> String {
        if plan.order.is_empty() {
            return String::new();
        }
        let items: Vec<String> = plan
            .order
            .iter()
            .map(|item| format!("{} {}", self.column(&item.column), item.direction.sql()))
            .collect();
        format!(" ORDER BY {}", items.join(", "))
    }

    fn pagination_clause(&self, plan: &QueryPlan) -> String {
        let mut clause = String::new();
        match (plan.limit(), plan.offset(), self.dialect) {
            (Some(limit), _, _) => clause.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(_), Dialect::Mysql) => clause.push_str(" LIMIT 18446744073709551615"),
            (None, Some(_), Dialect::Sqlite) => clause.push_str(" LIMIT -1"),
            _ => {}
        }
        if let Some(offset) = plan.offset() {
            clause.push_str(&format!(" OFFSET {}", offset));
        }
        clause
    }

    fn finish(self, model: &str, sql: String) -> Statement {
        tracing::debug!(model = %model, sql = %sql, params = self.params.len(), "rendered statement");
        Statement {
            model: model.to_string(),
            sql,
            params: self.params,
        }
    }
}

pub fn render_select(schema: &Schema, dialect: Dialect, plan: &QueryPlan) -> Result<Statement, Error> {
    select(schema, dialect, plan, None)
}

/// Select of related rows for eager loading: `plan` is the related model's
/// plan, restricted to rows belonging to the owning `keys`.
pub fn render_eager_select(
    schema: &Schema,
    dialect: Dialect,
    plan: &QueryPlan,
    relation: &RelationDefinition,
    keys: &[Value],
) -> Result<Statement, Error> {
    select(schema, dialect, plan, Some((relation, keys)))
}

fn select(
    schema: &Schema,
    dialect: Dialect,
    plan: &QueryPlan,
    restriction: Option<(&RelationDefinition, &[Value])>,
) -> Result<Statement, Error> {
    let model = schema.require(&plan.model)?;
    let mut r = Renderer::new(schema, dialect);
    let table = r.q(&plan.table);

    let mut columns: Vec<String> = match &plan.columns {
        Some(columns) => columns
            .iter()
            .map(|column| format!("{}.{}", table, r.q(column)))
            .collect(),
        None => vec![format!("{}.*", table)],
    };
    for item in &plan.selects {
        columns.push(format!("{} AS {}", r.column(&item.column), r.q(&item.alias)));
    }

    let mut from = format!("FROM {}", table);
    let mut extra = Vec::new();

    if let Some((relation, keys)) = restriction {
        match &relation.through {
            Some(through) => {
                let alias = r.q(THROUGH_ALIAS);
                from.push_str(&format!(
                    " INNER JOIN {} AS {} ON {}.{} = {}.{}",
                    r.q(&through.table),
                    alias,
                    alias,
                    r.q(&through.to),
                    table,
                    r.q(&relation.to)
                ));
                columns.push(format!("{}.{} AS {}", alias, r.q(&through.from), r.q(OWNER_KEY)));
                extra.push(Predicate::new(
                    PredicateMethod::WhereIn,
                    format!("{}.{}", THROUGH_ALIAS, through.from),
                    keys.to_vec(),
                ));
            }
            None => {
                if plan.columns.as_ref().is_some_and(|c| !c.contains(&relation.to)) {
                    columns.push(format!("{}.{}", table, r.q(&relation.to)));
                }
                extra.push(
                    Predicate::new(
                        PredicateMethod::WhereIn,
                        format!("{}.{}", plan.table, relation.to),
                        keys.to_vec(),
                    )
                    .typed(model.property(&relation.to).map(|p| p.kind)),
                );
            }
        }
    }

    for join in r.joins(plan, model)? {
        from.push(' ');
        from.push_str(&join);
    }

    let where_clause = r.where_clause(&plan.conditions, extra);
    let sql = format!(
        "SELECT {} {}{}{}{}",
        columns.join(", "),
        from,
        where_clause,
        r.order_clause(plan),
        r.pagination_clause(plan)
    );

    Ok(r.finish(&plan.model, sql))
}

/// Row count of everything `plan` matches, ignoring order and pagination.
pub fn render_count(schema: &Schema, dialect: Dialect, plan: &QueryPlan) -> Result<Statement, Error> {
    let model = schema.require(&plan.model)?;
    let mut r = Renderer::new(schema, dialect);
    let table = r.q(&plan.table);

    let count = match model.id_columns.as_slice() {
        [id] if !plan.joins.is_empty() => format!("COUNT(DISTINCT {}.{})", table, r.q(id)),
        _ => "COUNT(*)".to_string(),
    };

    let mut from = format!("FROM {}", table);
    for join in r.joins(plan, model)? {
        from.push(' ');
        from.push_str(&join);
    }

    let where_clause = r.where_clause(&plan.conditions, Vec::new());
    let sql = format!("SELECT {} AS {} {}{}", count, r.q("count"), from, where_clause);

    Ok(r.finish(&plan.model, sql))
}
