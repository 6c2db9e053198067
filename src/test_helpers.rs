//! Shared test helpers for engine unit tests.
//!
//! Provides a scripted [`Storage`] double that records every statement and
//! replays queued responses, plus row and node builders. All helpers are
//! `#[cfg(test)]` and never touch PostgreSQL.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::{ColumnDescriptor, NodeTypeDescriptor};
use crate::error::TreeError;
use crate::hierarchy::Hierarchy;
use crate::node::{Node, VirtualColumns};
use crate::schema::validate;
use crate::storage::{Row, Storage};
use crate::value::{NodeKey, Value};

// ── Storage double ──────────────────────────────────────────────────────

#[derive(Debug)]
enum Response {
    Rows(Vec<Row>),
    Affected(u64),
}

/// Storage that answers from a queue. Running out of scripted responses, or
/// hitting the wrong kind, is a storage error so tests fail loudly.
#[derive(Debug, Default)]
pub struct MockStorage {
    responses: VecDeque<Response>,
    statements: Vec<(String, Vec<Value>)>,
}

impl MockStorage {
    pub fn new() -> Self {
        MockStorage::default()
    }

    pub fn push_rows(&mut self, rows: Vec<Row>) {
        self.responses.push_back(Response::Rows(rows));
    }

    pub fn push_affected(&mut self, n: u64) {
        self.responses.push_back(Response::Affected(n));
    }

    /// Every statement seen so far with its parameters.
    pub fn statements(&self) -> &[(String, Vec<Value>)] {
        &self.statements
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }
}

fn script_error(msg: &str) -> TreeError {
    TreeError::storage(std::io::Error::other(msg.to_string()))
}

impl Storage for MockStorage {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, TreeError> {
        self.statements.push((sql.to_string(), params.to_vec()));
        match self.responses.pop_front() {
            Some(Response::Rows(rows)) => Ok(rows),
            Some(Response::Affected(_)) => Err(script_error("expected execute, got query")),
            None => Err(script_error("no scripted response left")),
        }
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, TreeError> {
        self.statements.push((sql.to_string(), params.to_vec()));
        match self.responses.pop_front() {
            Some(Response::Affected(n)) => Ok(n),
            Some(Response::Rows(_)) => Err(script_error("expected query, got execute")),
            None => Err(script_error("no scripted response left")),
        }
    }
}

// ── Schema builder ──────────────────────────────────────────────────────

/// `nodes(id integer, parent_id integer -> nodes, v integer, name varchar)`
/// ordered by `v`.
pub fn test_descriptor() -> NodeTypeDescriptor {
    NodeTypeDescriptor::new("node", "nodes")
        .with_self_reference("parent_id")
        .with_column(ColumnDescriptor::new("v", "integer"))
        .with_column(ColumnDescriptor::new("name", "varchar(32)"))
        .with_order_by("v".into())
}

pub fn test_hierarchy() -> Hierarchy {
    Hierarchy::new(Arc::new(validate(&test_descriptor()).unwrap_or_else(|e| {
        panic!("test descriptor must validate: {e}")
    })))
}

// ── Row / node builders ─────────────────────────────────────────────────

fn int_array(v: &[i64]) -> Value {
    Value::Array(v.iter().map(|i| Value::Int(*i)).collect())
}

/// A row as the recursive query returns it. `path` ends with `id`; the
/// ordering mirrors the path.
pub fn node_row(id: i64, parent: Option<i64>, path: &[i64]) -> Row {
    Row::new()
        .with("id", id)
        .with("parent_id", parent)
        .with("depth", path.len() as i64)
        .with("path", int_array(path))
        .with("ordering", int_array(path))
}

/// A row as a plain `SELECT *` returns it.
pub fn plain_row(id: i64, parent: Option<i64>) -> Row {
    Row::new().with("id", id).with("parent_id", parent)
}

/// A node carrying virtual columns derived from `path`.
pub fn loaded_node(id: i64, parent: Option<i64>, path: &[i64]) -> Node {
    Node::new(id, parent.map(NodeKey::Int)).with_virtuals(VirtualColumns {
        depth: path.len() as i32,
        path: path.iter().copied().map(NodeKey::Int).collect(),
        ordering: path.iter().copied().map(Value::Int).collect(),
    })
}
