//! Nodes and their derived (virtual) columns.
//!
//! A [`Node`] loaded through the recursive query carries [`VirtualColumns`];
//! one loaded by primary key alone does not, and asking it for depth, path
//! or ordering yields [`TreeError::VirtualColumnUnavailable`].

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::TreeError;
use crate::schema::HierarchySchema;
use crate::storage::Row;
use crate::value::{NodeKey, Value};

/// Depth, path and ordering derived by the recursive query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualColumns {
    /// 1 for roots.
    pub depth: i32,
    /// Ids from the root down to the node itself.
    pub path: Vec<NodeKey>,
    /// Concatenated per-level ordering keys.
    pub ordering: Vec<Value>,
}

impl VirtualColumns {
    /// Whether `key` is a strict ancestor on this path (the last element is
    /// the node itself and is skipped).
    pub fn has_ancestor(&self, key: &NodeKey) -> bool {
        match self.path.split_last() {
            Some((_, ancestors)) => ancestors.iter().any(|p| keys_match(p, key)),
            None => false,
        }
    }
}

/// Path elements may have been cast (e.g. a UUID key cast to text), so keys
/// compare by value first and by textual form second.
pub(crate) fn keys_match(a: &NodeKey, b: &NodeKey) -> bool {
    a == b || a.to_string() == b.to_string()
}

/// One row of the node table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    key: NodeKey,
    parent: Option<NodeKey>,
    columns: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none", flatten)]
    virtuals: Option<VirtualColumns>,
}

impl Node {
    /// A node without virtual columns.
    pub fn new(key: impl Into<NodeKey>, parent: Option<NodeKey>) -> Self {
        Node {
            key: key.into(),
            parent,
            columns: BTreeMap::new(),
            virtuals: None,
        }
    }

    pub fn with_column(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.columns.insert(column.to_string(), value.into());
        self
    }

    pub fn with_virtuals(mut self, virtuals: VirtualColumns) -> Self {
        self.virtuals = Some(virtuals);
        self
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn parent(&self) -> Option<&NodeKey> {
        self.parent.as_ref()
    }

    /// Change the parent reference in memory. Use
    /// [`Hierarchy::move_node`](crate::hierarchy::Hierarchy::move_node) to
    /// run placement hooks and persist.
    pub fn set_parent(&mut self, parent: Option<NodeKey>) {
        self.parent = parent;
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// A non-key, non-parent column.
    pub fn get(&self, column: &str) -> Result<&Value, TreeError> {
        self.columns
            .get(column)
            .ok_or_else(|| TreeError::UnknownColumn(column.to_string()))
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.columns.insert(column.to_string(), value.into());
    }

    pub fn columns(&self) -> &BTreeMap<String, Value> {
        &self.columns
    }

    pub fn virtuals(&self) -> Result<&VirtualColumns, TreeError> {
        self.virtuals
            .as_ref()
            .ok_or_else(|| TreeError::VirtualColumnUnavailable {
                node: self.key.clone(),
            })
    }

    pub fn has_virtuals(&self) -> bool {
        self.virtuals.is_some()
    }

    pub fn depth(&self) -> Result<i32, TreeError> {
        self.virtuals().map(|v| v.depth)
    }

    pub fn path(&self) -> Result<&[NodeKey], TreeError> {
        self.virtuals().map(|v| v.path.as_slice())
    }

    pub fn ordering(&self) -> Result<&[Value], TreeError> {
        self.virtuals().map(|v| v.ordering.as_slice())
    }

    /// Decode a storage row. Virtual columns are picked up when the row
    /// carries all three of them.
    pub fn from_row(schema: &HierarchySchema, row: &Row) -> Result<Node, TreeError> {
        let key = match row.get(schema.pk_name()) {
            Some(v) => NodeKey::try_from(v.clone())?,
            None => {
                return Err(TreeError::Decode(format!(
                    "row has no primary key column \"{}\"",
                    schema.pk_name()
                )));
            }
        };
        let parent = match row.get(&schema.parent_column) {
            None | Some(Value::Null) => None,
            Some(v) => Some(NodeKey::try_from(v.clone())?),
        };

        let virtuals = match (
            row.get(&schema.depth_column),
            row.get(&schema.path_column),
            row.get(&schema.ordering_column),
        ) {
            (Some(depth), Some(path), Some(ordering)) => {
                Some(decode_virtuals(depth, path, ordering)?)
            }
            _ => None,
        };

        let mut columns = BTreeMap::new();
        for (name, value) in row.iter() {
            if name == schema.pk_name()
                || name == schema.parent_column
                || schema.is_virtual_column(name)
            {
                continue;
            }
            columns.insert(name.to_string(), value.clone());
        }

        Ok(Node {
            key,
            parent,
            columns,
            virtuals,
        })
    }
}

fn decode_virtuals(depth: &Value, path: &Value, ordering: &Value) -> Result<VirtualColumns, TreeError> {
    let depth = depth
        .as_i64()
        .and_then(|d| i32::try_from(d).ok())
        .ok_or_else(|| TreeError::Decode(format!("depth must be an integer, got {depth}")))?;
    let path = path
        .as_array()
        .ok_or_else(|| TreeError::Decode(format!("path must be an array, got {path}")))?
        .iter()
        .cloned()
        .map(NodeKey::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    let ordering = ordering
        .as_array()
        .ok_or_else(|| TreeError::Decode(format!("ordering must be an array, got {ordering}")))?
        .to_vec();
    Ok(VirtualColumns {
        depth,
        path,
        ordering,
    })
}

/// A node to be inserted. A missing key leaves it to the column default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewNode {
    pub key: Option<NodeKey>,
    pub parent: Option<NodeKey>,
    pub columns: BTreeMap<String, Value>,
}

impl NewNode {
    pub fn new() -> Self {
        NewNode::default()
    }

    pub fn root() -> Self {
        NewNode::default()
    }

    pub fn child_of(parent: &Node) -> Self {
        NewNode {
            parent: Some(parent.key().clone()),
            ..NewNode::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<NodeKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_parent(mut self, parent: Option<NodeKey>) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_column(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.columns.insert(column.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnDescriptor, NodeTypeDescriptor};
    use crate::schema::validate;

    fn schema() -> HierarchySchema {
        validate(
            &NodeTypeDescriptor::new("node", "nodes")
                .with_self_reference("parent_id")
                .with_column(ColumnDescriptor::new("name", "text")),
        )
        .unwrap()
    }

    fn ints(v: &[i64]) -> Value {
        Value::Array(v.iter().map(|i| Value::Int(*i)).collect())
    }

    #[test]
    fn test_from_row_with_virtuals() {
        let row = Row::new()
            .with("id", 3_i64)
            .with("parent_id", 1_i64)
            .with("name", "c")
            .with("depth", 2_i64)
            .with("path", ints(&[1, 3]))
            .with("ordering", ints(&[1, 3]));
        let node = Node::from_row(&schema(), &row).unwrap();
        assert_eq!(node.key(), &NodeKey::Int(3));
        assert_eq!(node.parent(), Some(&NodeKey::Int(1)));
        assert_eq!(node.depth().unwrap(), 2);
        assert_eq!(node.path().unwrap(), &[NodeKey::Int(1), NodeKey::Int(3)]);
        assert_eq!(node.get("name").unwrap(), &Value::Text("c".into()));
        assert!(node.columns().get("depth").is_none());
    }

    #[test]
    fn test_from_row_plain_has_no_virtuals() {
        let row = Row::new()
            .with("id", 3_i64)
            .with("parent_id", Value::Null)
            .with("name", "c");
        let node = Node::from_row(&schema(), &row).unwrap();
        assert!(node.is_root());
        assert!(!node.has_virtuals());
        assert!(matches!(
            node.depth(),
            Err(TreeError::VirtualColumnUnavailable { .. })
        ));
        assert!(matches!(
            node.get("depth"),
            Err(TreeError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_from_row_missing_pk() {
        let row = Row::new().with("name", "c");
        assert!(matches!(
            Node::from_row(&schema(), &row),
            Err(TreeError::Decode(_))
        ));
    }

    #[test]
    fn test_from_row_rejects_scalar_path() {
        let row = Row::new()
            .with("id", 3_i64)
            .with("depth", 1_i64)
            .with("path", "{3}")
            .with("ordering", ints(&[3]));
        assert!(matches!(
            Node::from_row(&schema(), &row),
            Err(TreeError::Decode(_))
        ));
    }

    #[test]
    fn test_has_ancestor_skips_self() {
        let v = VirtualColumns {
            depth: 3,
            path: vec![NodeKey::Int(1), NodeKey::Int(2), NodeKey::Int(3)],
            ordering: vec![],
        };
        assert!(v.has_ancestor(&NodeKey::Int(1)));
        assert!(v.has_ancestor(&NodeKey::Int(2)));
        assert!(!v.has_ancestor(&NodeKey::Int(3)));
    }

    #[test]
    fn test_keys_match_textual_form() {
        let id = uuid::Uuid::new_v4();
        assert!(keys_match(
            &NodeKey::Uuid(id),
            &NodeKey::Text(id.to_string())
        ));
        assert!(!keys_match(&NodeKey::Int(1), &NodeKey::Int(2)));
    }

    #[test]
    fn test_node_serializes_with_virtuals_flattened() {
        let node = Node::new(1, None)
            .with_column("name", "a")
            .with_virtuals(VirtualColumns {
                depth: 1,
                path: vec![NodeKey::Int(1)],
                ordering: vec![Value::Int(1)],
            });
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["key"], 1);
        assert_eq!(json["depth"], 1);
        assert_eq!(json["columns"]["name"], "a");
    }
}
