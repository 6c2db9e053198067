//! Per-node-type configuration surface.
//!
//! A [`NodeTypeDescriptor`] is what the application hands to the engine: the
//! table, its columns, and the optional hierarchy parameters. It is plain
//! data (serde-deserializable, so it can live in a TOML file next to the rest
//! of the application's settings) and is turned into a validated
//! [`HierarchySchema`](crate::schema::HierarchySchema) exactly once.
//!
//! Traversal and deletion choices stay raw strings here. Validation maps
//! them onto [`TraversalMode`] and [`DeletePolicy`] and reports unknown
//! values as configuration errors at startup.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default CTE alias.
pub const DEFAULT_CTE_NAME: &str = "cte";
/// Default name of the reverse (children) relation.
pub const DEFAULT_CHILDREN_NAME: &str = "children";
pub const DEFAULT_DEPTH_COLUMN: &str = "depth";
pub const DEFAULT_PATH_COLUMN: &str = "path";
pub const DEFAULT_ORDERING_COLUMN: &str = "ordering";

/// Description of a node table, as supplied by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTypeDescriptor {
    /// Identifier of the node type; self-references point at this name.
    pub name: String,
    /// Table holding the nodes.
    pub table: String,
    /// Optional schema qualifying `table`.
    #[serde(default)]
    pub table_schema: Option<String>,
    /// Primary key column.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// All columns of the table, the primary key and parent column included.
    pub columns: Vec<ColumnDescriptor>,

    #[serde(default)]
    pub parent_column: Option<String>,
    #[serde(default)]
    pub children_relation: Option<String>,
    /// `none`, `depth_first` (`dfs`) or `breadth_first` (`bfs`).
    #[serde(default)]
    pub traversal: Option<String>,
    #[serde(default)]
    pub order_by: Vec<OrderColumn>,
    /// `none`, `cascade_subtree`, `promote_to_grandparent` or `first_child_as_root`.
    #[serde(default)]
    pub delete_policy: Option<String>,
    /// Database type the primary key is cast to inside path/ordering arrays.
    #[serde(default)]
    pub primary_key_cast: Option<String>,

    #[serde(default)]
    pub cte_name: Option<String>,
    #[serde(default)]
    pub depth_column: Option<String>,
    #[serde(default)]
    pub path_column: Option<String>,
    #[serde(default)]
    pub ordering_column: Option<String>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

impl NodeTypeDescriptor {
    /// Start a descriptor with an integer `id` primary key.
    pub fn new(name: &str, table: &str) -> Self {
        NodeTypeDescriptor {
            name: name.to_string(),
            table: table.to_string(),
            table_schema: None,
            primary_key: default_primary_key(),
            columns: vec![ColumnDescriptor::new("id", "integer")],
            parent_column: None,
            children_relation: None,
            traversal: None,
            order_by: Vec::new(),
            delete_policy: None,
            primary_key_cast: None,
            cte_name: None,
            depth_column: None,
            path_column: None,
            ordering_column: None,
        }
    }

    /// Replace the primary key column (and its described type).
    pub fn with_primary_key(mut self, column: &str, sql_type: &str) -> Self {
        self.columns.retain(|c| c.name != self.primary_key);
        self.primary_key = column.to_string();
        self.columns.insert(0, ColumnDescriptor::new(column, sql_type));
        self
    }

    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a column referencing this node type.
    pub fn with_self_reference(self, column: &str) -> Self {
        let pk_type = self
            .columns
            .iter()
            .find(|c| c.name == self.primary_key)
            .map_or_else(|| "integer".to_string(), |c| c.sql_type.clone());
        let name = self.name.clone();
        self.with_column(ColumnDescriptor::new(column, &pk_type).references(&name))
    }

    pub fn with_parent_column(mut self, column: &str) -> Self {
        self.parent_column = Some(column.to_string());
        self
    }

    pub fn with_traversal(mut self, traversal: &str) -> Self {
        self.traversal = Some(traversal.to_string());
        self
    }

    pub fn with_order_by(mut self, column: OrderColumn) -> Self {
        self.order_by.push(column);
        self
    }

    pub fn with_delete_policy(mut self, policy: &str) -> Self {
        self.delete_policy = Some(policy.to_string());
        self
    }

    pub fn with_primary_key_cast(mut self, sql_type: &str) -> Self {
        self.primary_key_cast = Some(sql_type.to_string());
        self
    }

    pub fn with_cte_name(mut self, name: &str) -> Self {
        self.cte_name = Some(name.to_string());
        self
    }
}

/// One table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Database type as written in DDL, e.g. `integer`, `varchar(128)`.
    pub sql_type: String,
    /// Node type this column references, if it is a foreign key.
    #[serde(default)]
    pub references: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: &str, sql_type: &str) -> Self {
        ColumnDescriptor {
            name: name.to_string(),
            sql_type: sql_type.to_string(),
            references: None,
        }
    }

    pub fn references(mut self, node_type: &str) -> Self {
        self.references = Some(node_type.to_string());
        self
    }
}

/// An `order_by` entry: a bare column name or a column with an explicit cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderColumn {
    Name(String),
    Cast {
        column: String,
        #[serde(default)]
        cast: Option<String>,
    },
}

impl OrderColumn {
    pub fn column(&self) -> &str {
        match self {
            OrderColumn::Name(name) => name,
            OrderColumn::Cast { column, .. } => column,
        }
    }

    pub fn cast(&self) -> Option<&str> {
        match self {
            OrderColumn::Name(_) => None,
            OrderColumn::Cast { cast, .. } => cast.as_deref(),
        }
    }

    pub fn cast_to(column: &str, sql_type: &str) -> Self {
        OrderColumn::Cast {
            column: column.to_string(),
            cast: Some(sql_type.to_string()),
        }
    }
}

impl From<&str> for OrderColumn {
    fn from(name: &str) -> Self {
        OrderColumn::Name(name.to_string())
    }
}

/// Order in which query results visit the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalMode {
    /// Not "unordered": resolves to the default, depth-first.
    None,
    #[default]
    DepthFirst,
    BreadthFirst,
}

impl TraversalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraversalMode::None => "none",
            TraversalMode::DepthFirst => "depth_first",
            TraversalMode::BreadthFirst => "breadth_first",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(TraversalMode::None),
            "depth_first" | "dfs" => Ok(TraversalMode::DepthFirst),
            "breadth_first" | "bfs" => Ok(TraversalMode::BreadthFirst),
            _ => Err(ConfigError::InvalidTraversalMode(s.to_string())),
        }
    }

    /// The traversal actually applied when building `ORDER BY`.
    pub fn effective(self) -> Self {
        match self {
            TraversalMode::None => TraversalMode::DepthFirst,
            other => other,
        }
    }
}

impl std::fmt::Display for TraversalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happens to a node's descendants when it is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Resolves to the default, `CascadeSubtree`.
    None,
    /// The whole subtree goes; removal is left to the storage layer's
    /// `ON DELETE CASCADE`.
    #[default]
    CascadeSubtree,
    /// Children are re-parented onto the deleted node's parent.
    PromoteToGrandparent,
    /// The first child takes the deleted node's place and adopts its siblings.
    FirstChildAsRoot,
}

impl DeletePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletePolicy::None => "none",
            DeletePolicy::CascadeSubtree => "cascade_subtree",
            DeletePolicy::PromoteToGrandparent => "promote_to_grandparent",
            DeletePolicy::FirstChildAsRoot => "first_child_as_root",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(DeletePolicy::None),
            "cascade_subtree" => Ok(DeletePolicy::CascadeSubtree),
            "promote_to_grandparent" => Ok(DeletePolicy::PromoteToGrandparent),
            "first_child_as_root" => Ok(DeletePolicy::FirstChildAsRoot),
            _ => Err(ConfigError::InvalidDeletePolicy(s.to_string())),
        }
    }

    pub fn effective(self) -> Self {
        match self {
            DeletePolicy::None => DeletePolicy::CascadeSubtree,
            other => other,
        }
    }
}

impl std::fmt::Display for DeletePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Top-level shape of a TOML configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigDocument {
    #[serde(default, rename = "node_type")]
    pub node_types: Vec<NodeTypeDescriptor>,
}

impl ConfigDocument {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
