//! Tree materializer.
//!
//! Turns the forest into nested JSON-like maps by walking from every root.
//! Two strategies shape the output:
//!
//! - [`NodeVisitor`] describes one node (default: depth, path, ordering,
//!   leaf/branch flags and the node itself);
//! - [`ChildrenOf`] picks the children to recurse into and the key they are
//!   attached under (default: the children relation, in sibling order).
//!
//! Closures implement both traits, so callers can relabel, filter or drop
//! children without touching the traversal. The default children strategy
//! issues one query per visited node.

use serde_json::{Map, Value as Json};

use crate::error::TreeError;
use crate::hierarchy::Hierarchy;
use crate::node::Node;
use crate::storage::Storage;

/// Description of one node in the materialized tree.
pub type Description = Map<String, Json>;

/// Produces the description of a single node.
pub trait NodeVisitor<S: Storage + ?Sized> {
    fn visit(
        &mut self,
        hierarchy: &Hierarchy,
        storage: &mut S,
        node: &Node,
    ) -> Result<Description, TreeError>;
}

impl<S, F> NodeVisitor<S> for F
where
    S: Storage + ?Sized,
    F: FnMut(&Hierarchy, &mut S, &Node) -> Result<Description, TreeError>,
{
    fn visit(
        &mut self,
        hierarchy: &Hierarchy,
        storage: &mut S,
        node: &Node,
    ) -> Result<Description, TreeError> {
        self(hierarchy, storage, node)
    }
}

/// Chooses the children of a node and the key to attach them under.
/// `None` attaches nothing and stops the descent at this node.
pub trait ChildrenOf<S: Storage + ?Sized> {
    fn children(
        &mut self,
        hierarchy: &Hierarchy,
        storage: &mut S,
        node: &Node,
    ) -> Result<Option<(String, Vec<Node>)>, TreeError>;
}

impl<S, F> ChildrenOf<S> for F
where
    S: Storage + ?Sized,
    F: FnMut(&Hierarchy, &mut S, &Node) -> Result<Option<(String, Vec<Node>)>, TreeError>,
{
    fn children(
        &mut self,
        hierarchy: &Hierarchy,
        storage: &mut S,
        node: &Node,
    ) -> Result<Option<(String, Vec<Node>)>, TreeError> {
        self(hierarchy, storage, node)
    }
}

/// `depth`, `path` (as strings), `ordering`, `leaf`, `branch` and `node`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultVisitor;

impl<S: Storage + ?Sized> NodeVisitor<S> for DefaultVisitor {
    fn visit(
        &mut self,
        hierarchy: &Hierarchy,
        storage: &mut S,
        node: &Node,
    ) -> Result<Description, TreeError> {
        let virtuals = node.virtuals()?;
        let branch = hierarchy.is_branch(storage, node)?;

        let mut description = Description::new();
        description.insert("depth".into(), Json::from(virtuals.depth));
        description.insert(
            "path".into(),
            Json::Array(
                virtuals
                    .path
                    .iter()
                    .map(|k| Json::String(k.to_string()))
                    .collect(),
            ),
        );
        description.insert("ordering".into(), to_json(&virtuals.ordering)?);
        description.insert("leaf".into(), Json::Bool(!branch));
        description.insert("branch".into(), Json::Bool(branch));
        description.insert("node".into(), to_json(node)?);
        Ok(description)
    }
}

/// The children relation under the schema's `children_relation` name.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultChildren;

impl<S: Storage + ?Sized> ChildrenOf<S> for DefaultChildren {
    fn children(
        &mut self,
        hierarchy: &Hierarchy,
        storage: &mut S,
        node: &Node,
    ) -> Result<Option<(String, Vec<Node>)>, TreeError> {
        let children = hierarchy.children(node).fetch(storage)?;
        Ok(Some((hierarchy.schema().children_relation.clone(), children)))
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Json, TreeError> {
    serde_json::to_value(value).map_err(|e| TreeError::Decode(e.to_string()))
}

impl Hierarchy {
    /// Materialize the whole forest, one entry per root in root order.
    pub fn as_tree<S, V, C>(
        &self,
        storage: &mut S,
        visitor: &mut V,
        children: &mut C,
    ) -> Result<Vec<Description>, TreeError>
    where
        S: Storage + ?Sized,
        V: NodeVisitor<S> + ?Sized,
        C: ChildrenOf<S> + ?Sized,
    {
        let roots = self.roots().fetch(storage)?;
        tracing::debug!(
            node_type = %self.schema().node_type,
            roots = roots.len(),
            "materializing forest"
        );
        roots
            .iter()
            .map(|root| self.node_as_tree(storage, root, visitor, children))
            .collect()
    }

    /// [`as_tree`](Self::as_tree) with [`DefaultVisitor`] and
    /// [`DefaultChildren`].
    pub fn as_tree_default<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
    ) -> Result<Vec<Description>, TreeError> {
        self.as_tree(storage, &mut DefaultVisitor, &mut DefaultChildren)
    }

    /// Describe `node` and, recursively, the children the strategy picks.
    pub fn node_as_tree<S, V, C>(
        &self,
        storage: &mut S,
        node: &Node,
        visitor: &mut V,
        children: &mut C,
    ) -> Result<Description, TreeError>
    where
        S: Storage + ?Sized,
        V: NodeVisitor<S> + ?Sized,
        C: ChildrenOf<S> + ?Sized,
    {
        let mut description = visitor.visit(self, storage, node)?;
        if let Some((key, kids)) = children.children(self, storage, node)? {
            let nested = kids
                .iter()
                .map(|child| self.node_as_tree(storage, child, visitor, children).map(Json::Object))
                .collect::<Result<Vec<_>, _>>()?;
            description.insert(key, Json::Array(nested));
        }
        Ok(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Row;
    use crate::test_helpers::{MockStorage, node_row, test_hierarchy};

    fn exists(b: bool) -> Vec<Row> {
        vec![Row::new().with("exists", b)]
    }

    /// Forest `1 -> 2`, scripted for the default strategies.
    fn scripted_forest() -> MockStorage {
        let mut storage = MockStorage::new();
        storage.push_rows(vec![node_row(1, None, &[1])]); // roots
        storage.push_rows(exists(true)); // visit 1
        storage.push_rows(vec![node_row(2, Some(1), &[1, 2])]); // children of 1
        storage.push_rows(exists(false)); // visit 2
        storage.push_rows(vec![]); // children of 2
        storage
    }

    #[test]
    fn test_default_tree_shape() {
        let h = test_hierarchy();
        let mut storage = scripted_forest();
        let forest = h.as_tree_default(&mut storage).unwrap();
        assert_eq!(forest.len(), 1);
        let root = &forest[0];
        assert_eq!(root["depth"], 1);
        assert_eq!(root["path"], serde_json::json!(["1"]));
        assert_eq!(root["branch"], true);
        assert_eq!(root["leaf"], false);
        assert_eq!(root["node"]["key"], 1);
        let kids = root["children"].as_array().unwrap();
        assert_eq!(kids.len(), 1);
        assert_eq!(kids[0]["depth"], 2);
        assert_eq!(kids[0]["leaf"], true);
        assert_eq!(kids[0]["children"], serde_json::json!([]));
        assert_eq!(storage.remaining(), 0);
    }

    fn id_visitor(_: &Hierarchy, _: &mut MockStorage, node: &Node) -> Result<Description, TreeError> {
        let mut d = Description::new();
        d.insert("id".into(), Json::String(node.key().to_string()));
        Ok(d)
    }

    fn kids_of(
        h: &Hierarchy,
        s: &mut MockStorage,
        node: &Node,
    ) -> Result<Option<(String, Vec<Node>)>, TreeError> {
        let kids = h.children(node).fetch(s)?;
        Ok(Some(("kids".to_string(), kids)))
    }

    #[test]
    fn test_custom_strategies() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        storage.push_rows(vec![node_row(1, None, &[1]), node_row(5, None, &[5])]);
        storage.push_rows(vec![node_row(2, Some(1), &[1, 2])]);
        storage.push_rows(vec![]);
        storage.push_rows(vec![]);

        let forest = h
            .as_tree(&mut storage, &mut id_visitor, &mut kids_of)
            .unwrap();
        assert_eq!(
            Json::Array(forest.into_iter().map(Json::Object).collect()),
            serde_json::json!([
                { "id": "1", "kids": [ { "id": "2", "kids": [] } ] },
                { "id": "5", "kids": [] },
            ])
        );
    }

    #[test]
    fn test_children_strategy_can_stop_descent() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        storage.push_rows(vec![node_row(1, None, &[1])]);
        let mut no_children = |_: &Hierarchy,
                               _: &mut MockStorage,
                               _: &Node|
         -> Result<Option<(String, Vec<Node>)>, TreeError> { Ok(None) };
        let forest = h
            .as_tree(&mut storage, &mut id_visitor, &mut no_children)
            .unwrap();
        assert_eq!(forest.len(), 1);
        assert!(!forest[0].contains_key("children"));
        assert_eq!(storage.statements().len(), 1);
    }

    #[test]
    fn test_default_visitor_requires_virtuals() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        let err = DefaultVisitor
            .visit(&h, &mut storage, &Node::new(1, None))
            .unwrap_err();
        assert!(matches!(err, TreeError::VirtualColumnUnavailable { .. }));
    }
}
