//! Error types for pg_cte_tree.
//!
//! All errors raised by the engine are represented by [`TreeError`]. Schema
//! problems are collected in [`ConfigError`], which is raised once when a node
//! type is validated and wrapped into `TreeError::Config` when it escapes
//! through a query or mutation call.
//!
//! # Error Classification
//!
//! - **Config** — the node type description is unusable. Fatal; fix the
//!   configuration and restart.
//! - **Usage** — the caller handed the engine something it cannot work with,
//!   e.g. a node that was not loaded through the recursive query.
//! - **NotFound** — a single-row expectation matched nothing. Ordinary
//!   control flow.
//! - **Storage** — anything the storage collaborator reported. Passed through
//!   untouched; the engine never retries.

use std::fmt;

use crate::value::NodeKey;

/// Boxed error reported by a [`Storage`](crate::storage::Storage) backend.
pub type StorageError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invalid node type configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No column references the node type itself.
    #[error("node type \"{0}\" has no self-referencing column to use as parent")]
    MissingParentReference(String),

    /// Several columns reference the node type and none was chosen explicitly.
    #[error(
        "node type \"{node_type}\" has several self-referencing columns ({}); set parent_column",
        .candidates.join(", ")
    )]
    AmbiguousParentReference {
        node_type: String,
        candidates: Vec<String>,
    },

    /// The configured parent column does not exist or points elsewhere.
    #[error("parent_column of \"{node_type}\" must reference \"{node_type}\", instead it is: {column}")]
    InvalidParentReference { node_type: String, column: String },

    #[error("traversal must be one of [none, depth_first, breadth_first]; instead it is: {0}")]
    InvalidTraversalMode(String),

    #[error(
        "delete_policy must be one of [none, cascade_subtree, promote_to_grandparent, \
         first_child_as_root]; instead it is: {0}"
    )]
    InvalidDeletePolicy(String),

    /// The primary key column is not among the described columns.
    #[error("primary key \"{column}\" of \"{node_type}\" is not a described column")]
    MissingPrimaryKey { node_type: String, column: String },

    /// An `order_by` entry names a column the table does not have.
    #[error("order_by of \"{node_type}\" names unknown column \"{column}\"")]
    UnknownOrderColumn { node_type: String, column: String },

    /// A virtual column name collides with a table column or another virtual column.
    #[error("virtual column \"{column}\" of \"{node_type}\" collides with an existing column")]
    VirtualColumnConflict { node_type: String, column: String },

    /// The recursive CTE name equals the table name and would shadow it.
    #[error("cte name \"{cte_name}\" of \"{node_type}\" shadows its table")]
    CteNameConflict { node_type: String, cte_name: String },

    /// The registry holds no schema under this name.
    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    /// A configuration document could not be parsed.
    #[error("configuration parse error: {0}")]
    Parse(String),
}

/// Primary error type of the engine.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    // ── Configuration — fatal ────────────────────────────────────────────
    #[error(transparent)]
    Config(#[from] ConfigError),

    // ── Usage — caller must change the call site ─────────────────────────
    /// The node carries no depth/path/ordering because it was loaded without
    /// the recursive query.
    #[error(
        "node {node} was not loaded through the recursive query; \
         depth, path and ordering are unavailable"
    )]
    VirtualColumnUnavailable { node: NodeKey },

    /// The node has no column with this name.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// An argument could not be turned into a valid query.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A row returned by storage did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    // ── Expected misses ──────────────────────────────────────────────────
    #[error("node not found: {0}")]
    NotFound(String),

    // ── Storage collaborator — passed through ────────────────────────────
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),
}

impl TreeError {
    /// Wrap a backend error without altering it.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TreeError::Storage(Box::new(err))
    }

    /// Whether the error means "no such row" rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TreeError::NotFound(_))
    }

    /// The engine performs no retries of its own; a backend that wants
    /// retry semantics inspects the boxed storage error itself.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Classification of errors for callers that branch on the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeErrorKind {
    Config,
    Usage,
    NotFound,
    Storage,
}

impl fmt::Display for TreeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeErrorKind::Config => write!(f, "CONFIG"),
            TreeErrorKind::Usage => write!(f, "USAGE"),
            TreeErrorKind::NotFound => write!(f, "NOT_FOUND"),
            TreeErrorKind::Storage => write!(f, "STORAGE"),
        }
    }
}

impl TreeError {
    pub fn kind(&self) -> TreeErrorKind {
        match self {
            TreeError::Config(_) => TreeErrorKind::Config,

            TreeError::VirtualColumnUnavailable { .. }
            | TreeError::UnknownColumn(_)
            | TreeError::InvalidArgument(_) => TreeErrorKind::Usage,

            TreeError::NotFound(_) => TreeErrorKind::NotFound,

            TreeError::Decode(_) | TreeError::Storage(_) => TreeErrorKind::Storage,
        }
    }
}
