//! pg_cte_tree — adjacency-list trees in PostgreSQL, queried through one
//! recursive CTE.
//!
//! Each node row stores only a reference to its parent. Everything else a
//! tree API needs (depth, the path from the root, a total order matching
//! depth-first or breadth-first traversal) is derived on the fly by a
//! `WITH RECURSIVE` query and exposed as three virtual columns: `depth`,
//! `path` and `ordering`.
//!
//! # Layers
//!
//! - [`config`] / [`schema`]: a node type is described once
//!   ([`NodeTypeDescriptor`], optionally from TOML), validated into an
//!   immutable [`HierarchySchema`] and kept in a [`SchemaRegistry`].
//! - [`cte`]: builds the recursive prelude and default ordering.
//! - [`query`] / [`hierarchy`]: composable [`NodeQuery`]s for roots,
//!   leaves, branches, siblings, ancestors and descendants; structural
//!   predicates; drilldown; minimal CRUD.
//! - [`mutation`]: move and the three subtree deletion policies.
//! - [`tree`]: nested materialization with pluggable visitor and children
//!   strategies.
//! - [`storage`] / [`backend`]: the SQL collaborator contract and its
//!   implementation over the synchronous `postgres` client.
//!
//! # Example
//!
//! ```no_run
//! use pg_cte_tree::{ColumnDescriptor, NodeTypeDescriptor, SchemaRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SchemaRegistry::new();
//! registry.register(
//!     &NodeTypeDescriptor::new("category", "categories")
//!         .with_self_reference("parent_id")
//!         .with_column(ColumnDescriptor::new("name", "varchar(64)"))
//!         .with_order_by("name".into()),
//! )?;
//! let categories = registry.hierarchy("category")?;
//!
//! let mut client = postgres::Client::connect("host=localhost user=postgres", postgres::NoTls)?;
//! for node in categories.roots().fetch(&mut client)? {
//!     let below = categories.descendants(&node).count(&mut client)?;
//!     println!("{} has {below} descendants", node.key());
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod cte;
pub mod error;
pub mod hierarchy;
pub mod mutation;
pub mod node;
pub mod query;
pub mod schema;
pub mod sql;
pub mod storage;
pub mod tree;
pub mod value;

#[cfg(test)]
mod test_helpers;

pub use config::{
    ColumnDescriptor, ConfigDocument, DeletePolicy, NodeTypeDescriptor, OrderColumn,
    TraversalMode,
};
pub use error::{ConfigError, TreeError, TreeErrorKind};
pub use hierarchy::Hierarchy;
pub use mutation::PositionHook;
pub use node::{NewNode, Node, VirtualColumns};
pub use query::{Lookup, NodeQuery};
pub use schema::{HierarchySchema, SchemaRegistry};
pub use storage::{Row, Storage};
pub use tree::{ChildrenOf, DefaultChildren, DefaultVisitor, Description, NodeVisitor};
pub use value::{NodeKey, Value};
