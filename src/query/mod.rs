pub mod expression;
pub mod filters;
pub mod handlers;
pub mod plan;
pub mod projection;
pub mod property_ref;

pub use expression::*;
pub use filters::*;
pub use handlers::*;
pub use plan::*;
pub use projection::*;
pub use property_ref::*;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::config::Settings;
use crate::error::{Error, QueryError};
use crate::model::{ModelDefinition, Schema};

/// Query parameters as decoded from a request: key to JSON value.
pub type QueryParams = Map<String, Value>;

static DEFAULT_SETTINGS: Lazy<Settings> = Lazy::new(Settings::default);
static DEFAULT_FILTERS: Lazy<FilterRegistry> = Lazy::new(FilterRegistry::new);
static DEFAULT_HANDLERS: Lazy<HandlerRegistry> = Lazy::new(HandlerRegistry::new);

/// Everything a [`QueryBuilder`] reads but never changes.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    pub schema: &'a Schema,
    pub settings: &'a Settings,
    pub filters: &'a FilterRegistry,
    pub handlers: &'a HandlerRegistry,
}

impl<'a> QueryContext<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            settings: &DEFAULT_SETTINGS,
            filters: &DEFAULT_FILTERS,
            handlers: &DEFAULT_HANDLERS,
        }
    }

    pub fn settings(mut self, settings: &'a Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn filters(mut self, filters: &'a FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    pub fn handlers(mut self, handlers: &'a HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }
}

/// Compiles query parameters for one model into a [`QueryPlan`].
///
/// ```rust,ignore
/// let mut builder = QueryBuilder::new(&schema, "Person")?;
/// builder.allow_filter(["firstName", "pets"])?;
/// builder.find(&params)?;
/// let plan = builder.finalize()?;
/// ```
#[derive(Debug)]
pub struct QueryBuilder<'a> {
    ctx: QueryContext<'a>,
    model: &'a ModelDefinition,
    plan: QueryPlan,
    property_refs: HashMap<(String, bool), Arc<PropertyRef>>,
    required_joins: Vec<Vec<String>>,
    allow_filter: AllowList,
    allow_scope: BTreeSet<String>,
    allow_param: BTreeSet<String>,
    scopes: Vec<String>,
    ignore_default_scope: bool,
    apply_default_eager: bool,
    apply_default_order: bool,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(schema: &'a Schema, model: &str) -> Result<Self, Error> {
        Self::with_context(QueryContext::new(schema), model)
    }

    pub fn with_context(ctx: QueryContext<'a>, model: &str) -> Result<Self, Error> {
        let model = ctx.schema.require(model)?;
        Ok(Self {
            ctx,
            model,
            plan: QueryPlan {
                model: model.name.clone(),
                table: model.table_name().to_string(),
                ..Default::default()
            },
            property_refs: HashMap::new(),
            required_joins: Vec::new(),
            allow_filter: AllowList::new(),
            allow_scope: BTreeSet::new(),
            allow_param: BTreeSet::new(),
            scopes: Vec::new(),
            ignore_default_scope: false,
            apply_default_eager: true,
            apply_default_order: true,
        })
    }

    /// Compiles `params` in one go. `allow_filter` restricts filterable
    /// references when non-empty.
    pub fn build(
        ctx: QueryContext<'a>,
        model: &str,
        params: &QueryParams,
        allow_filter: &[&str],
    ) -> Result<QueryPlan, Error> {
        let mut builder = Self::with_context(ctx, model)?;
        builder.allow_filter(allow_filter.iter().copied())?;
        builder.find(params)?;
        Ok(builder.finalize()?)
    }

    pub fn model(&self) -> &'a ModelDefinition {
        self.model
    }

    pub fn context(&self) -> QueryContext<'a> {
        self.ctx
    }

    /// Plan as built so far, before defaults and scopes are applied.
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    // ---- allow-lists ----------------------------------------------------

    /// Restricts filter and order references to the given properties or
    /// relations (and everything below a listed relation).
    pub fn allow_filter<I, S>(&mut self, references: I) -> Result<&mut Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for reference in references {
            let resolved =
                PropertyRef::resolve(self.ctx.schema, self.model, reference.as_ref(), false)?;
            self.allow_filter.insert(resolved.dotted());
        }
        Ok(self)
    }

    pub fn allow_scope<I, S>(&mut self, scopes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_scope.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Restricts which structural parameters (`eager`, `order`, ...) are
    /// accepted. Filter keys are governed by [`QueryBuilder::allow_filter`].
    pub fn allow_param<I, S>(&mut self, params: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_param.extend(params.into_iter().map(Into::into));
        self
    }

    fn check_param(&self, key: &str) -> Result<(), QueryError> {
        if !self.allow_param.is_empty() && !self.allow_param.contains(key) {
            return Err(QueryError::not_allowed(format!(
                "Query parameter `{}` is not allowed",
                key
            )));
        }
        Ok(())
    }

    fn without_allow_list<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, QueryError>,
    ) -> Result<T, QueryError> {
        let saved = std::mem::take(&mut self.allow_filter);
        let result = f(self);
        self.allow_filter = saved;
        result
    }

    // ---- references -----------------------------------------------------

    /// Resolves a reference, checks it against the allow-list and records
    /// the joins it needs. Resolutions are cached per builder.
    pub fn property_ref(
        &mut self,
        reference: &str,
        parse_direction: bool,
    ) -> Result<Arc<PropertyRef>, QueryError> {
        let key = (reference.to_string(), parse_direction);
        let resolved = match self.property_refs.get(&key) {
            Some(resolved) => resolved.clone(),
            None => {
                let resolved = Arc::new(PropertyRef::resolve(
                    self.ctx.schema,
                    self.model,
                    reference,
                    parse_direction,
                )?);
                self.property_refs.insert(key, resolved.clone());
                resolved
            }
        };

        if !self.allow_filter.allows(&resolved.path) {
            return Err(QueryError::not_allowed(format!(
                "Property reference `{}` is not allowed",
                resolved.dotted()
            )));
        }

        if resolved.requires_join() {
            let path = resolved.relation_path();
            if !self.required_joins.contains(&path) {
                self.required_joins.push(path);
            }
        }

        Ok(resolved)
    }

    /// Resolves a `a|b|c` (or `a,b,c`) key. A filter suffix on the last
    /// reference applies to every reference that has none of its own.
    pub fn property_refs(&mut self, key: &str) -> Result<Vec<Arc<PropertyRef>>, QueryError> {
        let parts: Vec<&str> = key
            .split(['|', ','])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();

        let shared_filter = parts
            .last()
            .and_then(|last| last.split_once(':'))
            .map(|(_, filter)| filter.trim().to_string());

        let mut refs = Vec::with_capacity(parts.len());
        for part in &parts {
            let reference = match (&shared_filter, part.contains(':')) {
                (Some(filter), false) => format!("{}:{}", part, filter),
                _ => part.to_string(),
            };
            refs.push(self.property_ref(&reference, false)?);
        }

        if refs.is_empty() {
            return Err(QueryError::invalid_reference(format!(
                "Empty property reference `{}`",
                key
            )));
        }
        Ok(refs)
    }

    // ---- parameter dispatch ---------------------------------------------

    /// Applies every query parameter. All failing keys are reported.
    pub fn find(&mut self, params: &QueryParams) -> Result<&mut Self, QueryError> {
        let handlers = self.ctx.handlers;
        let mut errors = Vec::new();

        for (key, value) in params {
            let result = if let Some(handler) = handlers.get(key) {
                self.check_param(key).and_then(|_| handler(self, key, value))
            } else if let Some(handler) = QueryHandler::from_key(key) {
                self.check_param(key).and_then(|_| handler.apply(self, value))
            } else {
                self.apply_filter(key, value).map(|_| ())
            };

            if let Err(err) = result {
                errors.push(err);
            }
        }

        match errors.len() {
            0 => Ok(self),
            1 => Err(errors.remove(0)),
            count => Err(QueryError::new(
                errors[0].kind(),
                format!("{} query parameters are invalid", count),
            )
            .with_errors(errors)),
        }
    }

    /// Adds the filter for one `ref[:filter]` key. Multiple references in
    /// the key are OR-ed.
    pub fn apply_filter(&mut self, key: &str, value: &Value) -> Result<&mut Self, QueryError> {
        let filters = self.ctx.filters;

        // a nested object under a plain key is a `where` object in disguise
        if value.is_object() {
            let mut wrapped = Map::new();
            wrapped.insert(key.to_string(), value.clone());
            return self.where_params(&Value::Object(wrapped));
        }

        let mut conditions = Vec::new();
        for property_ref in self.property_refs(key)? {
            conditions.push(filters.apply(&property_ref, value)?);
        }
        self.plan.conditions.push(Condition::any(conditions));
        Ok(self)
    }

    pub fn where_params(&mut self, value: &Value) -> Result<&mut Self, QueryError> {
        for entry in flatten_where(value, self.ctx.filters)? {
            self.apply_filter(&entry.key, &entry.value)?;
        }
        Ok(self)
    }

    // ---- structural setters ---------------------------------------------

    /// Merges a relation expression into the eager-load tree.
    pub fn eager(&mut self, expression: &str) -> Result<&mut Self, QueryError> {
        let parsed = RelationExpression::parse(expression)?;
        parsed.validate(self.ctx.schema, self.model)?;
        self.apply_default_eager = false;
        match &mut self.plan.eager {
            Some(eager) => eager.merge(parsed),
            None => self.plan.eager = Some(parsed),
        }
        Ok(self)
    }

    pub fn clear_eager(&mut self) -> &mut Self {
        self.apply_default_eager = false;
        self.plan.eager = None;
        self
    }

    pub fn with_scope<I, S>(&mut self, scopes: I) -> Result<&mut Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for scope in scopes {
            let scope = scope.into();
            if !self.model.scopes.contains_key(&scope) {
                return Err(QueryError::invalid_reference(format!(
                    "Unknown scope `{}` on `{}`",
                    scope, self.model.name
                )));
            }
            if !self.allow_scope.is_empty() && !self.allow_scope.contains(&scope) {
                return Err(QueryError::not_allowed(format!(
                    "Scope `{}` is not allowed",
                    scope
                )));
            }
            if !self.scopes.contains(&scope) {
                self.scopes.push(scope);
            }
        }
        Ok(self)
    }

    /// Skips the model's `default` scope.
    pub fn ignore_scope(&mut self) -> &mut Self {
        self.ignore_default_scope = true;
        self
    }

    pub fn clear_scope(&mut self) -> &mut Self {
        self.scopes.clear();
        self.ignore_default_scope = true;
        self
    }

    /// Appends `ref [asc|desc]` items, comma separated. Items through
    /// relations join the relation and select the column under an alias.
    pub fn order(&mut self, order: &str) -> Result<&mut Self, QueryError> {
        self.apply_default_order = false;

        for item in order.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let property_ref = self.property_ref(item, true)?;
            let property = match property_ref.property() {
                Some(property) => property,
                None => {
                    return Err(QueryError::invalid_reference(format!(
                        "Cannot order by relation `{}`",
                        property_ref.dotted()
                    )));
                }
            };
            if property.computed {
                continue;
            }

            let direction = property_ref.direction.unwrap_or_default();
            let column = if property_ref.requires_join() {
                let alias = format!(
                    "{}_{}",
                    property_ref.relation_path().join("_"),
                    property_ref.name
                );
                let select = SelectItem {
                    column: property_ref.full_name(),
                    alias: alias.clone(),
                };
                if !self.plan.selects.contains(&select) {
                    self.plan.selects.push(select);
                }
                alias
            } else {
                property_ref.full_name()
            };

            self.plan.order.push(OrderItem { column, direction });
        }
        Ok(self)
    }

    pub fn clear_order(&mut self) -> &mut Self {
        self.apply_default_order = false;
        self.plan.order.clear();
        self
    }

    /// Inclusive row range. The page size is clamped to `max_limit`.
    pub fn range(&mut self, start: u64, end: u64) -> Result<&mut Self, QueryError> {
        if end < start {
            return Err(QueryError::invalid_range(format!(
                "Invalid range `{},{}`",
                start, end
            )));
        }
        let size = self
            .ctx
            .settings
            .clamp_limit((end - start).saturating_add(1))
            .max(1);
        self.plan.pagination = Some(Pagination::Range {
            start,
            end: start.saturating_add(size - 1),
        });
        Ok(self)
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        let limit = Some(self.ctx.settings.clamp_limit(limit));
        let offset = self.plan.offset();
        self.plan.pagination = Some(Pagination::LimitOffset { limit, offset });
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        let limit = self.plan.limit();
        self.plan.pagination = Some(Pagination::LimitOffset {
            limit,
            offset: Some(offset),
        });
        self
    }

    pub fn pick(&mut self, projection: &str) -> Result<&mut Self, QueryError> {
        for (model, fields) in self.parse_projection(projection)? {
            self.plan.projections.entry(model).or_default().pick(fields);
        }
        Ok(self)
    }

    pub fn omit(&mut self, projection: &str) -> Result<&mut Self, QueryError> {
        for (model, fields) in self.parse_projection(projection)? {
            self.plan.projections.entry(model).or_default().omit(fields);
        }
        Ok(self)
    }

    fn parse_projection(
        &self,
        projection: &str,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, QueryError> {
        let parsed = parse_projection(projection)?;
        for (name, fields) in &parsed {
            let model = self.ctx.schema.model(name).ok_or_else(|| {
                QueryError::invalid_reference(format!("Unknown model `{}` in projection", name))
            })?;
            for field in fields {
                if model.property(field).is_none() && model.relation(field).is_none() {
                    return Err(QueryError::invalid_reference(format!(
                        "Unknown property `{}` on `{}` in projection",
                        field, name
                    )));
                }
            }
        }
        Ok(parsed)
    }

    /// Joins the relations along a dotted path, to-many hops included.
    pub fn join_relation(&mut self, kind: JoinKind, path: &str) -> Result<&mut Self, QueryError> {
        let segments: Vec<String> = path.split('.').map(|s| s.trim().to_string()).collect();

        let mut model = self.model;
        for segment in &segments {
            let relation = model.relation(segment).ok_or_else(|| {
                QueryError::invalid_reference(format!(
                    "Unknown relation `{}` on `{}`",
                    segment, model.name
                ))
            })?;
            model = self.ctx.schema.model(&relation.model).ok_or_else(|| {
                QueryError::invalid_reference(format!("Unknown model `{}`", relation.model))
            })?;
        }

        let join = JoinItem {
            kind,
            relation_path: segments,
        };
        if !self.plan.joins.iter().any(|existing| existing.alias() == join.alias()) {
            self.plan.joins.push(join);
        }
        Ok(self)
    }

    // ---- primitives -----------------------------------------------------

    /// Prefixes a bare column of the root model with its table name.
    pub fn qualify(&self, identifier: &str) -> String {
        if identifier.contains(['.', '(', '*']) || !self.model.has_column(identifier) {
            identifier.to_string()
        } else {
            format!("{}.{}", self.model.table_name(), identifier)
        }
    }

    fn column_type(&self, identifier: &str) -> Option<crate::model::PropertyType> {
        self.model.property(identifier).map(|property| property.kind)
    }

    pub fn where_compare(&mut self, column: &str, comparison: Comparison, value: Value) -> &mut Self {
        let predicate =
            Predicate::compare(self.qualify(column), comparison, value).typed(self.column_type(column));
        self.plan.conditions.push(predicate.into());
        self
    }

    pub fn where_null(&mut self, column: &str) -> &mut Self {
        let predicate = Predicate::null(self.qualify(column));
        self.plan.conditions.push(predicate.into());
        self
    }

    pub fn where_not_null(&mut self, column: &str) -> &mut Self {
        let predicate = Predicate::not_null(self.qualify(column));
        self.plan.conditions.push(predicate.into());
        self
    }

    pub fn where_in(&mut self, column: &str, values: Vec<Value>) -> &mut Self {
        let predicate = Predicate::new(PredicateMethod::WhereIn, self.qualify(column), values)
            .typed(self.column_type(column));
        self.plan.conditions.push(predicate.into());
        self
    }

    /// Equality on every entry of `map`.
    pub fn where_map(&mut self, map: &Map<String, Value>) -> &mut Self {
        for (column, value) in map {
            match value {
                Value::Null => self.where_null(column),
                value => self.where_compare(column, Comparison::Eq, value.clone()),
            };
        }
        self
    }

    pub fn where_raw(&mut self, sql: impl Into<String>, bindings: Vec<Value>) -> &mut Self {
        self.plan.conditions.push(Condition::Raw {
            sql: sql.into(),
            bindings,
        });
        self
    }

    pub fn order_by(&mut self, column: &str, direction: Direction) -> &mut Self {
        self.apply_default_order = false;
        let column = self.qualify(column);
        self.plan.order.push(OrderItem { column, direction });
        self
    }

    /// Selects only the given root columns.
    pub fn select<I, S>(&mut self, columns: I) -> Result<&mut Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if let Some(unknown) = columns.iter().find(|column| !self.model.has_column(column)) {
            return Err(QueryError::invalid_reference(format!(
                "Unknown column `{}` on `{}`",
                unknown, self.model.name
            )));
        }
        self.plan.columns = Some(columns);
        Ok(self)
    }

    /// Turns the query into a count. Default eager and order are skipped.
    pub fn count(&mut self) -> &mut Self {
        self.plan.operation = Operation::Count;
        self
    }

    /// Marks the query as the filter part of a write.
    pub fn for_write(&mut self, operation: Operation) -> &mut Self {
        self.plan.operation = operation;
        self
    }

    // ---- finalization ---------------------------------------------------

    /// Applies model defaults and scopes, then returns the plan.
    ///
    /// Default eager and order apply to plain reads only, and only when the
    /// caller did not set them. Scopes are applied last, the `default` scope
    /// first unless ignored.
    pub fn finalize(mut self) -> Result<QueryPlan, QueryError> {
        let model = self.model;
        let read = self.plan.operation == Operation::Read;

        if read && self.apply_default_eager {
            if let Some(expression) = model.default_eager.as_deref() {
                self.eager(expression)?;
            }
        }

        if read && self.apply_default_order && !model.default_order.is_empty() {
            let order = model.default_order.join(",");
            self.without_allow_list(|builder| builder.order(&order).map(|_| ()))?;
        }

        let mut scopes = Vec::new();
        if !self.ignore_default_scope && model.scopes.contains_key("default") {
            scopes.push("default".to_string());
        }
        for scope in std::mem::take(&mut self.scopes) {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        for scope in &scopes {
            if let Some(filter) = model.scopes.get(scope) {
                self.without_allow_list(|builder| builder.where_params(filter).map(|_| ()))?;
            }
        }
        self.plan.scopes = scopes;

        for relation_path in std::mem::take(&mut self.required_joins) {
            let alias = relation_path.join(":");
            if !self.plan.joins.iter().any(|join| join.alias() == alias) {
                self.plan.joins.push(JoinItem {
                    kind: JoinKind::Left,
                    relation_path,
                });
            }
        }

        if read {
            if let Some(max) = self.ctx.settings.max_limit {
                match self.plan.pagination {
                    None => {
                        self.plan.pagination = Some(Pagination::LimitOffset {
                            limit: Some(max),
                            offset: None,
                        })
                    }
                    Some(Pagination::LimitOffset { limit: None, offset }) => {
                        self.plan.pagination = Some(Pagination::LimitOffset {
                            limit: Some(max),
                            offset,
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        if self.plan.columns.is_none() {
            if let Some(projection) = self.plan.projections.get(&model.name) {
                self.plan.columns = Some(projection.columns(model));
            }
        }

        if let Some(eager) = self.plan.eager.as_mut() {
            project_nodes(
                self.ctx.schema,
                model,
                &mut eager.children,
                &self.plan.projections,
            );
        }

        Ok(self.plan)
    }
}

fn project_nodes(
    schema: &Schema,
    model: &ModelDefinition,
    nodes: &mut BTreeMap<String, RelationNode>,
    projections: &BTreeMap<String, Projection>,
) {
    if let Some(projection) = projections.get(&model.name) {
        nodes.retain(|name, _| projection.keeps(name));
    }

    for node in nodes.values_mut() {
        let Some(related) = model
            .relation(&node.name)
            .and_then(|relation| schema.model(&relation.model))
        else {
            continue;
        };
        if let Some(projection) = projections.get(&related.name) {
            node.columns = Some(projection.columns(related));
        }
        project_nodes(schema, related, &mut node.children, projections);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::error::QueryErrorKind;

    fn schema() -> Schema {
        Schema::from_json(
            r#"{
                "Person": {
                    "table": "people",
                    "properties": {
                        "firstName": "string",
                        "lastName": "string",
                        "age": "integer",
                        "deletedAt": "timestamp",
                        "fullName": { "type": "string", "computed": true }
                    },
                    "relations": {
                        "pets": { "relation": "hasMany", "model": "Animal", "from": "id", "to": "ownerId" },
                        "parent": { "relation": "belongsTo", "model": "Person", "from": "parentId", "to": "id" }
                    },
                    "scopes": {
                        "default": { "deletedAt": { "null": true } },
                        "adults": { "age": { "gte": 18 } }
                    },
                    "defaultEager": "pets",
                    "defaultOrder": ["lastName"]
                },
                "Animal": {
                    "properties": { "name": "string", "ownerId": "integer" }
                }
            }"#,
        )
        .unwrap()
    }

    fn params(value: Value) -> QueryParams {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    #[test]
    fn property_refs_are_cached_per_builder() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "Person").unwrap();

        let first = builder.property_ref("parent.firstName", false).unwrap();
        let second = builder.property_ref("parent.firstName", false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn allow_list_rejects_unlisted_references() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "Person").unwrap();
        builder.allow_filter(["firstName", "parent"]).unwrap();

        assert!(builder.property_ref("parent.lastName", false).is_ok());
        let err = builder.property_ref("lastName", false).unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::NotAllowed);
    }

    #[test]
    fn multi_reference_keys_are_or_ed() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "Person").unwrap();
        builder
            .find(&params(json!({ "firstName|lastName:like": "Jo%" })))
            .unwrap();

        match &builder.plan().conditions[..] {
            [Condition::Or(branches)] => {
                assert_eq!(branches.len(), 2);
                for branch in branches {
                    match branch {
                        Condition::Predicate(p) => {
                            assert_eq!(p.method, PredicateMethod::Where(Comparison::Like))
                        }
                        other => panic!("unexpected condition {:?}", other),
                    }
                }
            }
            other => panic!("unexpected conditions {:?}", other),
        }
    }

    #[test]
    fn defaults_apply_only_to_untouched_reads() {
        let schema = schema();

        let plan = QueryBuilder::new(&schema, "Person").unwrap().finalize().unwrap();
        assert_eq!(plan.eager.as_ref().map(ToString::to_string).as_deref(), Some("pets"));
        assert_eq!(plan.order[0].column, "people.lastName");
        assert_eq!(plan.scopes, vec!["default"]);

        let mut builder = QueryBuilder::new(&schema, "Person").unwrap();
        builder.order("age desc").unwrap();
        let plan = builder.finalize().unwrap();
        assert_eq!(plan.order.len(), 1);
        assert_eq!(plan.order[0].direction, Direction::Desc);

        let mut builder = QueryBuilder::new(&schema, "Person").unwrap();
        builder.count();
        let plan = builder.finalize().unwrap();
        assert!(plan.eager.is_none());
        assert!(plan.order.is_empty());
        // scopes still apply to counts
        assert_eq!(plan.conditions.len(), 1);
    }

    #[test]
    fn scopes_apply_last_and_can_be_ignored() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "Person").unwrap();
        builder.allow_filter(["firstName"]).unwrap();
        builder
            .find(&params(json!({ "firstName": "Jo", "scope": "adults" })))
            .unwrap();
        builder.ignore_scope();
        let plan = builder.finalize().unwrap();

        assert_eq!(plan.scopes, vec!["adults"]);
        assert_eq!(plan.conditions.len(), 2);

        let mut builder = QueryBuilder::new(&schema, "Person").unwrap();
        builder.allow_scope(["adults"]);
        let err = builder.with_scope(["default"]).unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::NotAllowed);
        let err = builder.with_scope(["teens"]).unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::InvalidReference);
    }

    #[test]
    fn order_through_relation_selects_alias_and_joins() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "Person").unwrap();
        builder.order("parent.lastName desc, fullName").unwrap();
        let plan = builder.finalize().unwrap();

        assert_eq!(
            plan.selects,
            vec![SelectItem {
                column: "parent.lastName".into(),
                alias: "parent_lastName".into()
            }]
        );
        assert_eq!(
            plan.order,
            vec![OrderItem {
                column: "parent_lastName".into(),
                direction: Direction::Desc
            }]
        );
        assert_eq!(plan.joins[0].relation_path, vec!["parent"]);
        assert_eq!(plan.joins[0].kind, JoinKind::Left);
    }

    #[test]
    fn range_clamps_to_max_limit() {
        let schema = schema();
        let settings = Settings {
            max_limit: Some(10),
            ..Default::default()
        };
        let mut builder =
            QueryBuilder::with_context(QueryContext::new(&schema).settings(&settings), "Person").unwrap();
        builder.range(20, 99).unwrap();
        let plan = builder.finalize().unwrap();

        assert_eq!(plan.pagination, Some(Pagination::Range { start: 20, end: 29 }));
        assert_eq!(plan.limit(), Some(10));
        assert_eq!(plan.offset(), Some(20));
    }

    #[test]
    fn pick_projects_root_columns_and_prunes_eager() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "Person").unwrap();
        builder.eager("[pets, parent]").unwrap();
        builder.pick("Person[firstName, pets], Animal[name]").unwrap();
        let plan = builder.finalize().unwrap();

        assert_eq!(
            plan.columns,
            Some(vec!["firstName".to_string(), "id".to_string()])
        );
        let eager = plan.eager.unwrap();
        assert_eq!(eager.to_string(), "pets");
        assert_eq!(
            eager.children["pets"].columns,
            Some(vec!["id".to_string(), "name".to_string()])
        );
    }

    #[test]
    fn qualification_of_primitives() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "Person").unwrap();
        assert_eq!(builder.qualify("age"), "people.age");
        assert_eq!(builder.qualify("fullName"), "fullName");
        assert_eq!(builder.qualify("pets.name"), "pets.name");

        builder.where_compare("age", Comparison::Gt, json!(3));
        let Condition::Predicate(predicate) = &builder.plan().conditions[0] else {
            panic!("expected a predicate");
        };
        assert_eq!(predicate.column, "people.age");
    }
}
