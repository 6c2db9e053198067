//! Structural mutations: move and the subtree deletion policies.
//!
//! Every policy is expressed as a sequence of [`Hierarchy::move_node`]
//! calls followed by the row deletion, one round trip per step, in sibling
//! order. The engine opens no transaction; pass a
//! `postgres::Transaction` as the storage to make a multi-child policy
//! atomic. An interrupted sequence leaves the children moved so far in
//! their new place.

use crate::config::DeletePolicy;
use crate::error::TreeError;
use crate::hierarchy::Hierarchy;
use crate::node::{Node, keys_match};
use crate::sql::quote_ident;
use crate::storage::Storage;
use crate::value::Value;

/// Callback run before a node is re-parented, with the node and its
/// destination (`None` when it becomes a root). Used for custom sibling
/// ordering, e.g. assigning an explicit position column.
pub type PositionHook<'a> = dyn FnMut(&mut Node, Option<&Node>) -> Result<(), TreeError> + 'a;

impl Hierarchy {
    /// Re-parent `node` under `destination`, or make it a root.
    ///
    /// `position` runs before the parent is assigned. With `save` the node is
    /// written back afterwards; otherwise persisting is up to the caller.
    /// Moving a node under itself or one of its own descendants is rejected.
    /// The check reads the destination's path, so a destination loaded
    /// without virtual columns fails with `VirtualColumnUnavailable`.
    pub fn move_node<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        mut node: Node,
        destination: Option<&Node>,
        position: Option<&mut PositionHook<'_>>,
        save: bool,
    ) -> Result<Node, TreeError> {
        if let Some(dest) = destination {
            let path = dest.path()?;
            let creates_cycle = keys_match(dest.key(), node.key())
                || path.iter().any(|k| keys_match(k, node.key()));
            if creates_cycle {
                return Err(TreeError::InvalidArgument(format!(
                    "cannot move {} under its own subtree (destination {})",
                    node.key(),
                    dest.key()
                )));
            }
        }

        if let Some(hook) = position {
            hook(&mut node, destination)?;
        }
        node.set_parent(destination.map(|d| d.key().clone()));
        tracing::debug!(
            node_type = %self.schema().node_type,
            node = %node.key(),
            destination = ?destination.map(Node::key),
            save,
            "moved node"
        );
        if save {
            self.save(storage, &node)?;
        }
        Ok(node)
    }

    /// Apply the deletion policy to `node`'s children without removing
    /// `node` itself. `policy` overrides the node type's configured policy;
    /// an explicit `DeletePolicy::None` means the default.
    pub fn prepare_delete<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        node: &Node,
        policy: Option<DeletePolicy>,
        mut position: Option<&mut PositionHook<'_>>,
        save: bool,
    ) -> Result<(), TreeError> {
        let policy = policy.unwrap_or(self.schema().delete_policy).effective();
        tracing::debug!(
            node_type = %self.schema().node_type,
            node = %node.key(),
            %policy,
            "preparing delete"
        );

        match policy {
            DeletePolicy::None | DeletePolicy::CascadeSubtree => Ok(()),
            DeletePolicy::PromoteToGrandparent => {
                let children = self.children(node).fetch(storage)?;
                if children.is_empty() {
                    return Ok(());
                }
                let grandparent = match node.parent() {
                    Some(key) => Some(self.get(storage, key)?),
                    None => None,
                };
                for child in children {
                    self.move_node(
                        storage,
                        child,
                        grandparent.as_ref(),
                        position.as_deref_mut(),
                        save,
                    )?;
                }
                Ok(())
            }
            DeletePolicy::FirstChildAsRoot => {
                let mut children = self.children(node).fetch(storage)?.into_iter();
                let Some(first) = children.next() else {
                    return Ok(());
                };
                let grandparent = match node.parent() {
                    Some(key) => Some(self.get(storage, key)?),
                    None => None,
                };
                let first = self.move_node(
                    storage,
                    first,
                    grandparent.as_ref(),
                    position.as_deref_mut(),
                    save,
                )?;
                for child in children {
                    self.move_node(storage, child, Some(&first), position.as_deref_mut(), save)?;
                }
                Ok(())
            }
        }
    }

    /// Apply the deletion policy, then delete `node`'s row. Moves are always
    /// saved. Returns the number of rows the final `DELETE` reported.
    pub fn delete<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        node: &Node,
        policy: Option<DeletePolicy>,
        position: Option<&mut PositionHook<'_>>,
    ) -> Result<u64, TreeError> {
        self.prepare_delete(storage, node, policy, position, true)?;
        let schema = self.schema();
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            schema.qualified_table(),
            quote_ident(schema.pk_name())
        );
        tracing::debug!(node_type = %schema.node_type, node = %node.key(), "deleting node");
        storage.execute(&sql, &[Value::from(node.key())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NodeKey;
    use crate::test_helpers::{MockStorage, loaded_node, node_row, test_hierarchy};

    /// Parent values bound by the UPDATE statements, in order.
    fn saved_parents(storage: &MockStorage) -> Vec<(Value, Value)> {
        storage
            .statements()
            .iter()
            .filter(|(sql, _)| sql.starts_with("UPDATE"))
            .map(|(_, params)| (params[params.len() - 1].clone(), params[0].clone()))
            .collect()
    }

    #[test]
    fn test_move_sets_parent_without_saving() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        let node = loaded_node(3, Some(1), &[1, 3]);
        let dest = loaded_node(2, Some(1), &[1, 2]);
        let moved = h.move_node(&mut storage, node, Some(&dest), None, false).unwrap();
        assert_eq!(moved.parent(), Some(&NodeKey::Int(2)));
        assert!(storage.statements().is_empty());
    }

    #[test]
    fn test_move_to_root_and_save() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        storage.push_affected(1);
        let node = loaded_node(3, Some(1), &[1, 3]);
        let moved = h.move_node(&mut storage, node, None, None, true).unwrap();
        assert!(moved.is_root());
        assert_eq!(saved_parents(&storage), vec![(Value::Int(3), Value::Null)]);
    }

    #[test]
    fn test_move_runs_hook_before_placement() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        let node = loaded_node(3, Some(1), &[1, 3]);
        let dest = loaded_node(2, None, &[2]);
        let mut seen = Vec::new();
        let mut hook = |n: &mut Node, d: Option<&Node>| -> Result<(), TreeError> {
            seen.push((n.parent().cloned(), d.map(|d| d.key().clone())));
            n.set("v", 99);
            Ok(())
        };
        let moved = h
            .move_node(&mut storage, node, Some(&dest), Some(&mut hook), false)
            .unwrap();
        assert_eq!(
            seen,
            vec![(Some(NodeKey::Int(1)), Some(NodeKey::Int(2)))]
        );
        assert_eq!(moved.get("v").unwrap(), &Value::Int(99));
    }

    #[test]
    fn test_move_hook_error_aborts() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        let mut hook = |_: &mut Node, _: Option<&Node>| -> Result<(), TreeError> {
            Err(TreeError::InvalidArgument("no".into()))
        };
        let err = h
            .move_node(&mut storage, loaded_node(3, None, &[3]), None, Some(&mut hook), true)
            .unwrap_err();
        assert!(matches!(err, TreeError::InvalidArgument(_)));
        assert!(storage.statements().is_empty());
    }

    #[test]
    fn test_move_into_own_subtree_rejected() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        let node = loaded_node(2, Some(1), &[1, 2]);
        let below = loaded_node(5, Some(2), &[1, 2, 5]);
        assert!(matches!(
            h.move_node(&mut storage, node.clone(), Some(&below), None, false),
            Err(TreeError::InvalidArgument(_))
        ));
        assert!(matches!(
            h.move_node(&mut storage, node.clone(), Some(&node), None, false),
            Err(TreeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_move_requires_destination_virtuals() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        let node = loaded_node(2, Some(1), &[1, 2]);
        let plain_dest = Node::new(5, Some(NodeKey::Int(2)));
        assert!(matches!(
            h.move_node(&mut storage, node, Some(&plain_dest), None, true),
            Err(TreeError::VirtualColumnUnavailable { node }) if node == NodeKey::Int(5)
        ));
        assert!(storage.statements().is_empty());
    }

    #[test]
    fn test_cascade_issues_only_the_delete() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        storage.push_affected(1);
        let node = loaded_node(2, Some(1), &[1, 2]);
        assert_eq!(h.delete(&mut storage, &node, None, None).unwrap(), 1);
        assert_eq!(storage.statements().len(), 1);
        assert_eq!(
            storage.statements()[0].0,
            "DELETE FROM \"nodes\" WHERE \"id\" = $1"
        );
    }

    #[test]
    fn test_explicit_none_policy_means_default() {
        let mut d = crate::test_helpers::test_descriptor();
        d.delete_policy = Some("promote_to_grandparent".into());
        let h = Hierarchy::from_descriptor(&d).unwrap();
        let mut storage = MockStorage::new();
        h.prepare_delete(
            &mut storage,
            &loaded_node(2, Some(1), &[1, 2]),
            Some(DeletePolicy::None),
            None,
            true,
        )
        .unwrap();
        assert!(storage.statements().is_empty());
    }

    #[test]
    fn test_configured_policy_applies_without_override() {
        let mut d = crate::test_helpers::test_descriptor();
        d.delete_policy = Some("promote_to_grandparent".into());
        let h = Hierarchy::from_descriptor(&d).unwrap();
        let mut storage = MockStorage::new();
        storage.push_rows(vec![]);
        h.prepare_delete(&mut storage, &loaded_node(2, None, &[2]), None, None, true)
            .unwrap();
        // Only the children lookup ran.
        assert_eq!(storage.statements().len(), 1);
    }

    #[test]
    fn test_promote_to_grandparent() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        storage.push_rows(vec![
            node_row(3, Some(2), &[1, 2, 3]),
            node_row(4, Some(2), &[1, 2, 4]),
        ]);
        storage.push_rows(vec![node_row(1, None, &[1])]);
        storage.push_affected(1);
        storage.push_affected(1);
        storage.push_affected(1);
        let node = loaded_node(2, Some(1), &[1, 2]);
        h.delete(
            &mut storage,
            &node,
            Some(DeletePolicy::PromoteToGrandparent),
            None,
        )
        .unwrap();
        assert_eq!(
            saved_parents(&storage),
            vec![
                (Value::Int(3), Value::Int(1)),
                (Value::Int(4), Value::Int(1)),
            ]
        );
        assert_eq!(storage.remaining(), 0);
        assert!(storage.statements().last().unwrap().0.starts_with("DELETE"));
    }

    #[test]
    fn test_promote_from_root_makes_roots() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        storage.push_rows(vec![node_row(3, Some(2), &[2, 3])]);
        storage.push_affected(1);
        h.prepare_delete(
            &mut storage,
            &loaded_node(2, None, &[2]),
            Some(DeletePolicy::PromoteToGrandparent),
            None,
            true,
        )
        .unwrap();
        assert_eq!(saved_parents(&storage), vec![(Value::Int(3), Value::Null)]);
    }

    #[test]
    fn test_first_child_as_root() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        storage.push_rows(vec![
            node_row(3, Some(2), &[1, 2, 3]),
            node_row(4, Some(2), &[1, 2, 4]),
            node_row(5, Some(2), &[1, 2, 5]),
        ]);
        storage.push_rows(vec![node_row(1, None, &[1])]);
        for _ in 0..3 {
            storage.push_affected(1);
        }
        let mut calls = 0;
        let mut hook = |_: &mut Node, _: Option<&Node>| -> Result<(), TreeError> {
            calls += 1;
            Ok(())
        };
        h.prepare_delete(
            &mut storage,
            &loaded_node(2, Some(1), &[1, 2]),
            Some(DeletePolicy::FirstChildAsRoot),
            Some(&mut hook),
            true,
        )
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(
            saved_parents(&storage),
            vec![
                (Value::Int(3), Value::Int(1)),
                (Value::Int(4), Value::Int(3)),
                (Value::Int(5), Value::Int(3)),
            ]
        );
    }

    #[test]
    fn test_policies_tolerate_no_children() {
        let h = test_hierarchy();
        for policy in [
            DeletePolicy::CascadeSubtree,
            DeletePolicy::PromoteToGrandparent,
            DeletePolicy::FirstChildAsRoot,
        ] {
            let mut storage = MockStorage::new();
            storage.push_rows(vec![]);
            h.prepare_delete(
                &mut storage,
                &loaded_node(2, Some(1), &[1, 2]),
                Some(policy),
                None,
                true,
            )
            .unwrap();
        }
    }

    #[test]
    fn test_unsaved_moves_issue_no_updates() {
        let h = test_hierarchy();
        let mut storage = MockStorage::new();
        storage.push_rows(vec![node_row(3, Some(2), &[2, 3])]);
        h.prepare_delete(
            &mut storage,
            &loaded_node(2, None, &[2]),
            Some(DeletePolicy::FirstChildAsRoot),
            None,
            false,
        )
        .unwrap();
        assert!(saved_parents(&storage).is_empty());
    }
}
