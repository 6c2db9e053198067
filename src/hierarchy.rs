//! Query and CRUD handle for one node type.
//!
//! [`Hierarchy`] is a cheap, cloneable handle over a validated
//! [`HierarchySchema`]. Query builders (`roots`, `descendants`, ...) return
//! a [`NodeQuery`] that callers may filter further before running it;
//! structural predicates (`is_parent_of`, `is_ancestor_of`, ...) compare
//! already-loaded nodes and never touch storage.
//!
//! Mutations (move, delete policies) live in [`crate::mutation`] and the
//! materializer in [`crate::tree`], both as further `impl Hierarchy` blocks.

use std::sync::Arc;

use crate::config::NodeTypeDescriptor;
use crate::error::{ConfigError, TreeError};
use crate::node::{NewNode, Node};
use crate::query::NodeQuery;
use crate::schema::{HierarchySchema, validate};
use crate::sql::{Params, qualified, quote_ident};
use crate::storage::Storage;
use crate::value::{NodeKey, Value};

#[derive(Debug, Clone)]
pub struct Hierarchy {
    schema: Arc<HierarchySchema>,
}

impl Hierarchy {
    pub fn new(schema: Arc<HierarchySchema>) -> Self {
        Hierarchy { schema }
    }

    /// Validate a descriptor outside any registry.
    pub fn from_descriptor(descriptor: &NodeTypeDescriptor) -> Result<Self, ConfigError> {
        validate(descriptor).map(|s| Hierarchy::new(Arc::new(s)))
    }

    pub fn schema(&self) -> &HierarchySchema {
        &self.schema
    }

    // ── Query builders ──────────────────────────────────────────────────

    /// Every node in traversal order.
    pub fn all(&self) -> NodeQuery {
        NodeQuery::new(Arc::clone(&self.schema), None)
    }

    pub fn roots(&self) -> NodeQuery {
        self.all().parent_is(None)
    }

    /// Nodes no other node names as parent.
    pub fn leaves(&self) -> NodeQuery {
        self.all()
            .where_sql(|schema, _| format!("NOT EXISTS ({})", child_probe(schema)))
    }

    /// Nodes with at least one child.
    pub fn branches(&self) -> NodeQuery {
        self.all()
            .where_sql(|schema, _| format!("EXISTS ({})", child_probe(schema)))
    }

    /// Immediate children in sibling order, carrying virtual columns.
    pub fn children(&self, node: &Node) -> NodeQuery {
        self.all().parent_is(Some(node.key()))
    }

    /// Nodes sharing `node`'s parent, `node` excluded. Roots are siblings of
    /// each other.
    pub fn siblings(&self, node: &Node) -> NodeQuery {
        self.all().parent_is(node.parent()).exclude_key(node.key())
    }

    /// Strict ancestors, root first.
    pub fn ancestors(&self, node: &Node) -> Result<NodeQuery, TreeError> {
        let path = node.path()?;
        let ancestors = path.split_last().map_or(&[][..], |(_, rest)| rest);
        Ok(self.all().key_in(ancestors))
    }

    /// The subtree under `node`, `node` excluded.
    pub fn descendants(&self, node: &Node) -> NodeQuery {
        NodeQuery::new(Arc::clone(&self.schema), Some(node.key())).exclude_key(node.key())
    }

    // ── Single-node lookups ─────────────────────────────────────────────

    /// Root of the tree `node` belongs to (`node` itself for a root).
    pub fn root<S: Storage + ?Sized>(&self, storage: &mut S, node: &Node) -> Result<Node, TreeError> {
        let first = node.path()?.first().cloned().ok_or_else(|| {
            TreeError::Decode(format!("node {} has an empty path", node.key()))
        })?;
        self.get(storage, &first)
    }

    /// Load one node through the recursive query.
    pub fn get<S: Storage + ?Sized>(&self, storage: &mut S, key: &NodeKey) -> Result<Node, TreeError> {
        self.all()
            .filter_key(key)
            .first(storage)
            .map_err(|e| match e {
                TreeError::NotFound(_) => {
                    TreeError::NotFound(format!("{} {key}", self.schema.node_type))
                }
                other => other,
            })
    }

    /// Load one node with a plain primary-key select. The node has no
    /// virtual columns.
    pub fn load_plain<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        key: &NodeKey,
    ) -> Result<Node, TreeError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = $1",
            self.schema.qualified_table(),
            quote_ident(self.schema.pk_name())
        );
        tracing::debug!(node_type = %self.schema.node_type, %key, "loading plain node");
        let rows = storage.query(&sql, &[Value::from(key)])?;
        match rows.first() {
            Some(row) => Node::from_row(&self.schema, row),
            None => Err(TreeError::NotFound(format!(
                "{} {key}",
                self.schema.node_type
            ))),
        }
    }

    // ── Structural predicates ───────────────────────────────────────────

    pub fn is_parent_of(&self, node: &Node, subject: &Node) -> bool {
        subject.parent() == Some(node.key())
    }

    pub fn is_child_of(&self, node: &Node, subject: &Node) -> bool {
        node.parent() == Some(subject.key())
    }

    /// A node is never its own sibling.
    pub fn is_sibling_of(&self, node: &Node, subject: &Node) -> bool {
        node.key() != subject.key() && node.parent() == subject.parent()
    }

    /// Whether `node` lies on `subject`'s path above it. Needs virtual
    /// columns on both; a missing subject is simply not a descendant.
    pub fn is_ancestor_of(&self, node: &Node, subject: Option<&Node>) -> Result<bool, TreeError> {
        node.virtuals()?;
        let Some(subject) = subject else {
            return Ok(false);
        };
        let virtuals = subject.virtuals()?;
        if virtuals.depth == 1 {
            return Ok(false);
        }
        Ok(virtuals.has_ancestor(node.key()))
    }

    /// Whether `subject` lies on `node`'s path above it.
    pub fn is_descendant_of(
        &self,
        node: &Node,
        subject: Option<&Node>,
    ) -> Result<bool, TreeError> {
        let virtuals = node.virtuals()?;
        let Some(subject) = subject else {
            return Ok(false);
        };
        if virtuals.depth == 1 {
            return Ok(false);
        }
        Ok(virtuals.has_ancestor(subject.key()))
    }

    pub fn is_leaf<S: Storage + ?Sized>(&self, storage: &mut S, node: &Node) -> Result<bool, TreeError> {
        self.has_children(storage, node).map(|b| !b)
    }

    pub fn is_branch<S: Storage + ?Sized>(&self, storage: &mut S, node: &Node) -> Result<bool, TreeError> {
        self.has_children(storage, node)
    }

    fn has_children<S: Storage + ?Sized>(&self, storage: &mut S, node: &Node) -> Result<bool, TreeError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = $1)",
            self.schema.qualified_table(),
            quote_ident(&self.schema.parent_column)
        );
        let rows = storage.query(&sql, &[Value::from(node.key())])?;
        match rows.first().and_then(|r| r.get_index(0)) {
            Some(Value::Bool(b)) => Ok(*b),
            _ => Err(TreeError::Decode("EXISTS returned no bool".into())),
        }
    }

    /// Value of `column` on `node`. Understands the primary key, the parent
    /// column and the virtual columns as well as ordinary columns.
    pub fn value_of(&self, node: &Node, column: &str) -> Result<Value, TreeError> {
        let schema = &self.schema;
        if column == schema.pk_name() {
            Ok(node.key().into())
        } else if column == schema.parent_column {
            Ok(node.parent().map_or(Value::Null, Value::from))
        } else if column == schema.depth_column {
            node.depth().map(|d| Value::Int(d.into()))
        } else if column == schema.path_column {
            Ok(Value::Array(node.path()?.iter().map(Value::from).collect()))
        } else if column == schema.ordering_column {
            Ok(Value::Array(node.ordering()?.to_vec()))
        } else {
            node.get(column).cloned()
        }
    }

    /// `column` of every ancestor, then of `node` itself, with `missing`
    /// standing in for NULLs.
    pub fn attribute_path<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        node: &Node,
        column: &str,
        missing: Value,
    ) -> Result<Vec<Value>, TreeError> {
        let mut nodes = self.ancestors(node)?.fetch(storage)?;
        nodes.push(node.clone());
        nodes
            .iter()
            .map(|n| {
                self.value_of(n, column).map(|v| match v {
                    Value::Null => missing.clone(),
                    other => other,
                })
            })
            .collect()
    }

    /// Find a node by descending from the roots. Each path component is
    /// zipped against `columns` (which may carry lookup suffixes such as
    /// `v__gte`) and must match one node on its level; the first match in
    /// sibling order wins. An empty path yields the first root.
    pub fn drilldown<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        columns: &[&str],
        path: &[Vec<Value>],
    ) -> Result<Node, TreeError> {
        let Some((first, rest)) = path.split_first() else {
            return self.roots().first(storage).map_err(|e| match e {
                TreeError::NotFound(_) => {
                    TreeError::NotFound(format!("{} forest is empty", self.schema.node_type))
                }
                other => other,
            });
        };

        let mut current = self
            .bind_component(self.roots(), columns, first, 0)?
            .first(storage)
            .map_err(|e| self.drilldown_miss(e, 0))?;

        for (i, component) in rest.iter().enumerate() {
            let level = i + 1;
            current = self
                .bind_component(self.children(&current), columns, component, level)?
                .first(storage)
                .map_err(|e| self.drilldown_miss(e, level))?;
            tracing::debug!(level, node = %current.key(), "drilldown descended");
        }
        Ok(current)
    }

    fn bind_component(
        &self,
        mut query: NodeQuery,
        columns: &[&str],
        component: &[Value],
        level: usize,
    ) -> Result<NodeQuery, TreeError> {
        if component.len() != columns.len() {
            return Err(TreeError::InvalidArgument(format!(
                "drilldown component {level} has {} values for {} columns",
                component.len(),
                columns.len()
            )));
        }
        for (column, value) in columns.iter().zip(component) {
            query = query.filter(column, value.clone())?;
        }
        Ok(query)
    }

    fn drilldown_miss(&self, err: TreeError, level: usize) -> TreeError {
        match err {
            TreeError::NotFound(_) => TreeError::NotFound(format!(
                "{} drilldown found nothing at level {level}",
                self.schema.node_type
            )),
            other => other,
        }
    }

    // ── CRUD ────────────────────────────────────────────────────────────

    /// Insert a row and return it loaded through the recursive query.
    pub fn insert<S: Storage + ?Sized>(&self, storage: &mut S, new: NewNode) -> Result<Node, TreeError> {
        let schema = &self.schema;
        let mut names = Vec::new();
        let mut params = Params::new();
        let mut placeholders = Vec::new();

        if let Some(key) = &new.key {
            names.push(quote_ident(schema.pk_name()));
            placeholders.push(params.push(key));
        }
        names.push(quote_ident(&schema.parent_column));
        placeholders.push(params.push(new.parent.as_ref().map(Value::from)));
        for (column, value) in &new.columns {
            if !schema.has_column(column) || schema.is_virtual_column(column) {
                return Err(TreeError::UnknownColumn(column.clone()));
            }
            names.push(quote_ident(column));
            placeholders.push(params.push(value.clone()));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            schema.qualified_table(),
            names.join(", "),
            placeholders.join(", "),
            quote_ident(schema.pk_name())
        );
        tracing::debug!(node_type = %schema.node_type, %sql, "inserting node");
        let rows = storage.query(&sql, params.values())?;
        let key = rows
            .first()
            .and_then(|r| r.get_index(0))
            .cloned()
            .ok_or_else(|| TreeError::Decode("INSERT returned no key".into()))
            .and_then(NodeKey::try_from)?;
        self.get(storage, &key)
    }

    /// Write the parent reference and every ordinary column of `node`.
    pub fn save<S: Storage + ?Sized>(&self, storage: &mut S, node: &Node) -> Result<u64, TreeError> {
        let schema = &self.schema;
        let mut params = Params::new();
        let mut assignments = vec![format!(
            "{} = {}",
            quote_ident(&schema.parent_column),
            params.push(node.parent().map(Value::from))
        )];
        for (column, value) in node.columns() {
            if !schema.has_column(column) {
                continue;
            }
            assignments.push(format!(
                "{} = {}",
                quote_ident(column),
                params.push(value.clone())
            ));
        }
        let key = params.push(node.key());
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {key}",
            schema.qualified_table(),
            assignments.join(", "),
            quote_ident(schema.pk_name())
        );
        tracing::debug!(node_type = %schema.node_type, node = %node.key(), "saving node");
        let affected = storage.execute(&sql, params.values())?;
        if affected == 0 {
            return Err(TreeError::NotFound(format!(
                "{} {}",
                schema.node_type,
                node.key()
            )));
        }
        Ok(affected)
    }
}

/// Correlated probe for a row naming the outer node as parent.
fn child_probe(schema: &HierarchySchema) -> String {
    format!(
        "SELECT 1 FROM {} \"child\" WHERE {} = {}",
        schema.qualified_table(),
        qualified("\"child\"", &schema.parent_column),
        qualified(&schema.table_alias(), schema.pk_name())
    )
}
