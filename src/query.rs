//! Composable node queries.
//!
//! A [`NodeQuery`] wraps a [`QueryFragment`] and layers caller filters,
//! ordering and paging on top of it. Nothing touches storage until one of
//! the terminal methods ([`fetch`](NodeQuery::fetch),
//! [`first`](NodeQuery::first), [`count`](NodeQuery::count),
//! [`exists`](NodeQuery::exists)) runs, and each of those is exactly one
//! round trip.
//!
//! Filters are written the way ORM lookups are: a column name with an
//! optional `__suffix` naming the comparison (`"v__gte"`, `"name__ne"`,
//! `"parent_id__isnull"`). Virtual columns resolve to the CTE namespace.

use std::fmt;
use std::sync::Arc;

use crate::cte::{self, QueryFragment};
use crate::error::TreeError;
use crate::node::Node;
use crate::schema::HierarchySchema;
use crate::sql::{Params, qualified};
use crate::storage::Storage;
use crate::value::{NodeKey, Value};

/// Comparison applied by a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Exact,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Takes a boolean: `true` matches NULL, `false` matches non-NULL.
    IsNull,
}

impl Lookup {
    pub fn parse(s: &str) -> Option<Lookup> {
        match s {
            "exact" => Some(Lookup::Exact),
            "ne" => Some(Lookup::Ne),
            "gt" => Some(Lookup::Gt),
            "gte" => Some(Lookup::Gte),
            "lt" => Some(Lookup::Lt),
            "lte" => Some(Lookup::Lte),
            "isnull" => Some(Lookup::IsNull),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::Ne => "ne",
            Lookup::Gt => "gt",
            Lookup::Gte => "gte",
            Lookup::Lt => "lt",
            Lookup::Lte => "lte",
            Lookup::IsNull => "isnull",
        }
    }

    /// Split `"col__gte"` into `("col", Gte)`. A field without a recognised
    /// suffix is an exact match on the whole name.
    pub fn split(field: &str) -> (&str, Lookup) {
        match field.rsplit_once("__") {
            Some((column, suffix)) if !column.is_empty() => match Lookup::parse(suffix) {
                Some(lookup) => (column, lookup),
                None => (field, Lookup::Exact),
            },
            _ => (field, Lookup::Exact),
        }
    }

    fn operator(&self) -> &'static str {
        match self {
            Lookup::Exact => "=",
            Lookup::Ne => "<>",
            Lookup::Gt => ">",
            Lookup::Gte => ">=",
            Lookup::Lt => "<",
            Lookup::Lte => "<=",
            Lookup::IsNull => "IS NULL",
        }
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render one comparison, binding its value into `params`.
fn condition(
    reference: &str,
    lookup: Lookup,
    value: Value,
    params: &mut Params,
) -> Result<String, TreeError> {
    match (lookup, value) {
        (Lookup::IsNull, Value::Bool(true)) => Ok(format!("{reference} IS NULL")),
        (Lookup::IsNull, Value::Bool(false)) => Ok(format!("{reference} IS NOT NULL")),
        (Lookup::IsNull, other) => Err(TreeError::InvalidArgument(format!(
            "isnull lookup on {reference} takes a bool, got {}",
            other.type_name()
        ))),
        (Lookup::Exact, Value::Null) => Ok(format!("{reference} IS NULL")),
        (Lookup::Ne, Value::Null) => Ok(format!("{reference} IS NOT NULL")),
        (lookup, Value::Null) => Err(TreeError::InvalidArgument(format!(
            "{lookup} lookup on {reference} cannot compare with NULL"
        ))),
        (lookup, value) => {
            let placeholder = params.push(value);
            Ok(format!("{reference} {} {placeholder}", lookup.operator()))
        }
    }
}

/// A lazily executed query over the nodes of one hierarchy, exposing the
/// virtual columns.
#[derive(Debug, Clone)]
pub struct NodeQuery {
    schema: Arc<HierarchySchema>,
    fragment: QueryFragment,
    predicates: Vec<String>,
    params: Params,
    order_by: Option<Vec<String>>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl NodeQuery {
    /// Every node, or every node of the subtree rooted at `offset_node`
    /// (the offset node included).
    pub fn new(schema: Arc<HierarchySchema>, offset_node: Option<&NodeKey>) -> Self {
        let fragment = cte::build(&schema, offset_node);
        let params = fragment.params.clone();
        NodeQuery {
            schema,
            fragment,
            predicates: Vec::new(),
            params,
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn schema(&self) -> &HierarchySchema {
        &self.schema
    }

    /// Keep nodes matching a lookup, e.g. `filter("v__gte", 3)`.
    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Result<Self, TreeError> {
        let (column, lookup) = Lookup::split(field);
        let reference = cte::column_ref(&self.schema, column)?;
        let sql = condition(&reference, lookup, value.into(), &mut self.params)?;
        self.predicates.push(sql);
        Ok(self)
    }

    /// Drop nodes matching a lookup.
    pub fn exclude(mut self, field: &str, value: impl Into<Value>) -> Result<Self, TreeError> {
        let (column, lookup) = Lookup::split(field);
        let reference = cte::column_ref(&self.schema, column)?;
        let sql = condition(&reference, lookup, value.into(), &mut self.params)?;
        self.predicates.push(format!("NOT ({sql})"));
        Ok(self)
    }

    pub fn filter_key(mut self, key: &NodeKey) -> Self {
        let placeholder = self.params.push(key);
        let pk = self.pk_ref();
        self.predicates.push(format!("{pk} = {placeholder}"));
        self
    }

    pub fn exclude_key(mut self, key: &NodeKey) -> Self {
        let placeholder = self.params.push(key);
        let pk = self.pk_ref();
        self.predicates.push(format!("{pk} <> {placeholder}"));
        self
    }

    /// Nodes whose parent is `parent`; `None` selects roots.
    pub fn parent_is(mut self, parent: Option<&NodeKey>) -> Self {
        let column = qualified(&self.schema.table_alias(), &self.schema.parent_column);
        let sql = match parent {
            Some(key) => format!("{column} = {}", self.params.push(key)),
            None => format!("{column} IS NULL"),
        };
        self.predicates.push(sql);
        self
    }

    /// Nodes whose primary key is one of `keys`. An empty list matches nothing.
    pub fn key_in(mut self, keys: &[NodeKey]) -> Self {
        if keys.is_empty() {
            self.predicates.push("FALSE".to_string());
            return self;
        }
        let placeholders = keys
            .iter()
            .map(|k| self.params.push(k))
            .collect::<Vec<_>>()
            .join(", ");
        let pk = self.pk_ref();
        self.predicates.push(format!("{pk} IN ({placeholders})"));
        self
    }

    /// Add a raw predicate. The closure receives the schema and the
    /// parameter list so it can bind values.
    pub(crate) fn where_sql(
        mut self,
        build: impl FnOnce(&HierarchySchema, &mut Params) -> String,
    ) -> Self {
        let sql = build(&self.schema, &mut self.params);
        self.predicates.push(sql);
        self
    }

    /// Replace the default ordering. A leading `-` sorts descending; virtual
    /// column names are rewritten into the CTE namespace.
    pub fn order_by(mut self, terms: &[&str]) -> Result<Self, TreeError> {
        let rewritten = terms
            .iter()
            .map(|t| cte::rewrite_order_term(&self.schema, t))
            .collect::<Result<Vec<_>, _>>()?;
        self.order_by = Some(rewritten);
        Ok(self)
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    fn pk_ref(&self) -> String {
        qualified(&self.schema.table_alias(), self.schema.pk_name())
    }

    fn from_where(&self) -> String {
        let mut conditions = vec![self.fragment.base_where.clone()];
        conditions.extend(self.fragment.offset_where.iter().cloned());
        conditions.extend(self.predicates.iter().cloned());
        format!(
            "  FROM {}\n WHERE {}",
            self.fragment.tables.join(", "),
            conditions.join("\n   AND ")
        )
    }

    fn paging(&self) -> String {
        let mut sql = String::new();
        if let Some(n) = self.limit {
            sql.push_str(&format!("\n LIMIT {n}"));
        }
        if let Some(n) = self.offset {
            sql.push_str(&format!("\nOFFSET {n}"));
        }
        sql
    }

    fn select_sql(&self) -> String {
        let order = self.order_by.as_ref().unwrap_or(&self.fragment.order_by);
        let order_sql = if order.is_empty() {
            String::new()
        } else {
            format!("\n ORDER BY {}", order.join(", "))
        };
        format!(
            "{}SELECT {}.*, {}\n{}{order_sql}{}",
            self.fragment.prelude,
            self.schema.table_alias(),
            self.fragment.select.join(", "),
            self.from_where(),
            self.paging(),
        )
    }

    /// The statement [`fetch`](Self::fetch) would run, with its parameters.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        (self.select_sql(), self.params.values().to_vec())
    }

    /// The statement [`count`](Self::count) would run. Paging, when set,
    /// limits what is counted.
    pub fn to_count_sql(&self) -> (String, Vec<Value>) {
        let sql = if self.limit.is_some() || self.offset.is_some() {
            format!(
                "{}SELECT count(*) FROM (SELECT {}\n{}{}) AS \"paged\"",
                self.fragment.prelude,
                self.pk_ref(),
                self.from_where(),
                self.paging(),
            )
        } else {
            format!(
                "{}SELECT count(*)\n{}",
                self.fragment.prelude,
                self.from_where()
            )
        };
        (sql, self.params.values().to_vec())
    }

    fn to_exists_sql(&self) -> (String, Vec<Value>) {
        let sql = format!(
            "{}SELECT EXISTS (SELECT 1\n{})",
            self.fragment.prelude,
            self.from_where()
        );
        (sql, self.params.values().to_vec())
    }

    /// Run the query and decode every row.
    pub fn fetch<S: Storage + ?Sized>(&self, storage: &mut S) -> Result<Vec<Node>, TreeError> {
        let (sql, params) = self.to_sql();
        tracing::debug!(
            node_type = %self.schema.node_type,
            params = params.len(),
            %sql,
            "fetching nodes"
        );
        storage
            .query(&sql, &params)?
            .iter()
            .map(|row| Node::from_row(&self.schema, row))
            .collect()
    }

    /// The first node in query order, or `NotFound`.
    pub fn first<S: Storage + ?Sized>(&self, storage: &mut S) -> Result<Node, TreeError> {
        let limited = self.clone().limit(1);
        limited.fetch(storage)?.into_iter().next().ok_or_else(|| {
            TreeError::NotFound(format!("no {} matches the query", self.schema.node_type))
        })
    }

    pub fn count<S: Storage + ?Sized>(&self, storage: &mut S) -> Result<u64, TreeError> {
        let (sql, params) = self.to_count_sql();
        tracing::debug!(node_type = %self.schema.node_type, %sql, "counting nodes");
        let rows = storage.query(&sql, &params)?;
        let value = rows
            .first()
            .and_then(|row| row.get_index(0))
            .and_then(Value::as_i64)
            .ok_or_else(|| TreeError::Decode("count(*) returned no integer".into()))?;
        u64::try_from(value).map_err(|_| TreeError::Decode(format!("negative count {value}")))
    }

    pub fn exists<S: Storage + ?Sized>(&self, storage: &mut S) -> Result<bool, TreeError> {
        let (sql, params) = self.to_exists_sql();
        tracing::debug!(node_type = %self.schema.node_type, %sql, "probing nodes");
        let rows = storage.query(&sql, &params)?;
        match rows.first().and_then(|row| row.get_index(0)) {
            Some(Value::Bool(b)) => Ok(*b),
            other => Err(TreeError::Decode(format!(
                "EXISTS returned {}",
                other.map_or("no row", Value::type_name)
            ))),
        }
    }
}
