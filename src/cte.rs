//! Recursive query builder.
//!
//! Produces the `WITH RECURSIVE` prelude that derives `depth`, `path` and
//! `ordering` for every node, plus the join, filter and `ORDER BY` pieces the
//! outer query needs to expose them.
//!
//! The derived relation is a fixed point evaluated by PostgreSQL:
//!
//! - base case: every node with a NULL parent, `depth = 1`,
//!   `path = [id]`, `ordering = [key(node)]`;
//! - recursive case: every node whose parent is already derived, with
//!   `depth = depth(parent) + 1`, `path = path(parent) || id` and
//!   `ordering = ordering(parent) || key(node)`.
//!
//! # SQL Generation Strategy
//!
//! ```sql
//! WITH RECURSIVE "cte" ("depth", "path", "ordering", "id") AS (
//!     SELECT 1, array[T."id"], array[T."v"], T."id"
//!       FROM "nodes" T
//!      WHERE T."parent_id" IS NULL
//!     UNION ALL
//!     SELECT "cte"."depth" + 1, "cte"."path" || T."id",
//!            "cte"."ordering" || array[T."v"], T."id"
//!       FROM "nodes" T
//!       JOIN "cte" ON T."parent_id" = "cte"."id"
//! )
//! SELECT "nodes".*, "cte"."depth", "cte"."path", "cte"."ordering"
//!   FROM "nodes" "nodes", "cte"
//!  WHERE "cte"."id" = "nodes"."id"
//!  ORDER BY "cte"."ordering", "nodes"."v"
//! ```
//!
//! Depth-first order falls out of comparing `ordering` arrays element by
//! element; breadth-first order sorts by `depth` first.

use crate::config::TraversalMode;
use crate::error::TreeError;
use crate::schema::HierarchySchema;
use crate::sql::{Params, col_list, qualified, quote_ident};
use crate::value::NodeKey;

/// The pieces of a hierarchy query that depend only on the schema (and the
/// optional offset node). The outer query is assembled by
/// [`NodeQuery`](crate::query::NodeQuery).
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFragment {
    /// `WITH RECURSIVE ... ( ... )`
    pub prelude: String,
    /// Virtual column selections, e.g. `"cte"."depth"`.
    pub select: Vec<String>,
    /// Relations of the outer `FROM`.
    pub tables: Vec<String>,
    /// Equates the CTE's primary key with the base table's.
    pub base_where: String,
    /// Restricts results to the subtree of the offset node, when one is set.
    /// The offset node itself still matches.
    pub offset_where: Option<String>,
    /// Default ordering terms.
    pub order_by: Vec<String>,
    /// Parameters referenced by `offset_where`.
    pub params: Params,
}

/// Build the fragment for `schema`, optionally scoped to the subtree rooted
/// at `offset`.
pub fn build(schema: &HierarchySchema, offset: Option<&NodeKey>) -> QueryFragment {
    let cte = schema.cte_alias();
    let mut params = Params::new();

    let offset_where = offset.map(|key| {
        let placeholder = params.push(key);
        format!(
            "{placeholder} = ANY({})",
            qualified(&cte, &schema.path_column)
        )
    });

    QueryFragment {
        prelude: recursive_prelude(schema),
        select: vec![
            qualified(&cte, &schema.depth_column),
            qualified(&cte, &schema.path_column),
            qualified(&cte, &schema.ordering_column),
        ],
        tables: vec![
            format!("{} {}", schema.qualified_table(), schema.table_alias()),
            cte.clone(),
        ],
        base_where: format!(
            "{} = {}",
            qualified(&cte, schema.pk_name()),
            qualified(&schema.table_alias(), schema.pk_name())
        ),
        offset_where,
        order_by: default_order_by(schema),
        params,
    }
}

/// The `WITH RECURSIVE` block deriving depth, path and ordering.
pub fn recursive_prelude(schema: &HierarchySchema) -> String {
    let cte = schema.cte_alias();
    let depth = quote_ident(&schema.depth_column);
    let path = quote_ident(&schema.path_column);
    let ordering = quote_ident(&schema.ordering_column);
    let pk = quote_ident(schema.pk_name());
    let parent = quote_ident(&schema.parent_column);
    let table = schema.qualified_table();
    let pk_path = schema.pk_path_expr();
    let order = schema.order_key_expr();
    let columns = col_list(&[
        schema.depth_column.clone(),
        schema.path_column.clone(),
        schema.ordering_column.clone(),
        schema.pk_name().to_string(),
    ]);

    format!(
        "WITH RECURSIVE {cte} ({columns}) AS (\n\
         \x20   SELECT 1 AS {depth},\n\
         \x20          array[{pk_path}] AS {path},\n\
         \x20          {order} AS {ordering},\n\
         \x20          T.{pk}\n\
         \x20     FROM {table} T\n\
         \x20    WHERE T.{parent} IS NULL\n\
         \x20   UNION ALL\n\
         \x20   SELECT {cte}.{depth} + 1 AS {depth},\n\
         \x20          {cte}.{path} || {pk_path},\n\
         \x20          {cte}.{ordering} || {order},\n\
         \x20          T.{pk}\n\
         \x20     FROM {table} T\n\
         \x20     JOIN {cte} ON T.{parent} = {cte}.{pk}\n\
         )\n"
    )
}

/// Default `ORDER BY` terms for the schema's traversal mode, followed by the
/// configured `order_by` columns of the base table.
///
/// `TraversalMode::None` is not "unordered": it takes the depth-first
/// default.
pub fn default_order_by(schema: &HierarchySchema) -> Vec<String> {
    let cte = schema.cte_alias();
    let mut terms = match schema.traversal.effective() {
        TraversalMode::BreadthFirst => vec![
            qualified(&cte, &schema.depth_column),
            qualified(&cte, &schema.ordering_column),
        ],
        _ => vec![qualified(&cte, &schema.ordering_column)],
    };
    let alias = schema.table_alias();
    terms.extend(schema.order_by.iter().map(|o| qualified(&alias, &o.column)));
    terms
}

/// Resolve a column name to its reference in the outer query: virtual
/// columns live in the CTE namespace, everything else on the base table.
pub fn column_ref(schema: &HierarchySchema, column: &str) -> Result<String, TreeError> {
    if schema.is_virtual_column(column) {
        Ok(qualified(&schema.cte_alias(), column))
    } else if schema.has_column(column) {
        Ok(qualified(&schema.table_alias(), column))
    } else {
        Err(TreeError::UnknownColumn(column.to_string()))
    }
}

/// Rewrite a caller-supplied ordering term. A leading `-` sorts descending.
pub fn rewrite_order_term(schema: &HierarchySchema, term: &str) -> Result<String, TreeError> {
    let (column, descending) = match term.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (term, false),
    };
    let reference = column_ref(schema, column)?;
    Ok(if descending {
        format!("{reference} DESC")
    } else {
        reference
    })
}
