//! Shared test helpers for integration tests using Testcontainers.

#![allow(dead_code)]

use pg_cte_tree::{ColumnDescriptor, Hierarchy, NodeTypeDescriptor};
use postgres::{Client, NoTls};
use testcontainers::{Container, ImageExt, runners::SyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Integer-keyed tree. Deleting a row cascades to its subtree.
pub const NODES_DDL: &str = r#"
CREATE TABLE nodes (
    id        SERIAL PRIMARY KEY,
    parent_id INTEGER REFERENCES nodes(id) ON DELETE CASCADE,
    name      VARCHAR(32) NOT NULL,
    v         INTEGER
);
CREATE INDEX nodes_parent_idx ON nodes (parent_id);
"#;

/// UUID-keyed tree ordered by a varchar column.
pub const FOLDERS_DDL: &str = r#"
CREATE TABLE folders (
    id        UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    parent_id UUID REFERENCES folders(id) ON DELETE CASCADE,
    name      VARCHAR(64) NOT NULL
);
"#;

/// Tree keyed by a varchar code.
pub const VARCHAR_DDL: &str = r#"
CREATE TABLE categories (
    code   VARCHAR(16) PRIMARY KEY,
    parent VARCHAR(16) REFERENCES categories(code) ON DELETE CASCADE,
    name   VARCHAR(64) NOT NULL
);
"#;

/// A PostgreSQL container and a connected synchronous client.
pub struct TestDb {
    pub client: Client,
    _container: Container<Postgres>,
}

impl TestDb {
    /// Start a fresh PostgreSQL 18.1 container and connect to it.
    pub fn new() -> Self {
        init_tracing();
        let container = Postgres::default()
            .with_tag("18.1-alpine")
            .start()
            .expect("Failed to start PostgreSQL 18.1 container");

        let port = container
            .get_host_port_ipv4(5432)
            .expect("Failed to get mapped port");

        let connection_string = format!(
            "host=127.0.0.1 port={port} user=postgres password=postgres dbname=postgres"
        );
        let client = Client::connect(&connection_string, NoTls)
            .expect("Failed to connect to test database");

        TestDb {
            client,
            _container: container,
        }
    }

    /// Start a fresh container with the `nodes` table created.
    pub fn with_nodes() -> Self {
        let mut db = Self::new();
        db.execute(NODES_DDL);
        db
    }

    /// Start a fresh container with the `folders` table created.
    pub fn with_folders() -> Self {
        let mut db = Self::new();
        db.execute(FOLDERS_DDL);
        db
    }

    /// Start a fresh container with the `categories` table created.
    pub fn with_varchar() -> Self {
        let mut db = Self::new();
        db.execute(VARCHAR_DDL);
        db
    }

    /// Insert a row into `categories`.
    pub fn insert_category(&mut self, code: &str, parent: Option<&str>, name: &str) {
        self.client
            .execute(
                "INSERT INTO categories (code, parent, name) VALUES ($1, $2, $3)",
                &[&code, &parent, &name],
            )
            .unwrap_or_else(|e| panic!("insert of {} failed: {}", code, e));
    }

    /// Execute one or more SQL statements.
    pub fn execute(&mut self, sql: &str) {
        self.client
            .batch_execute(sql)
            .unwrap_or_else(|e| panic!("SQL execution failed: {}\nSQL: {}", e, sql));
    }

    /// Count rows in a table.
    pub fn count(&mut self, table: &str) -> i64 {
        self.client
            .query_one(&format!("SELECT count(*) FROM {}", table), &[])
            .unwrap_or_else(|e| panic!("count failed: {}", e))
            .get(0)
    }

    /// Insert a row into `nodes` and return its id.
    pub fn insert_node(&mut self, name: &str, parent: Option<i32>, v: i32) -> i32 {
        self.client
            .query_one(
                "INSERT INTO nodes (name, parent_id, v) VALUES ($1, $2, $3) RETURNING id",
                &[&name, &parent, &v],
            )
            .unwrap_or_else(|e| panic!("insert of {} failed: {}", name, e))
            .get(0)
    }

    /// Parent id of a `nodes` row.
    pub fn parent_of(&mut self, id: i32) -> Option<i32> {
        self.client
            .query_one("SELECT parent_id FROM nodes WHERE id = $1", &[&id])
            .unwrap_or_else(|e| panic!("parent lookup failed: {}", e))
            .get(0)
    }
}

/// Route engine logs to the test writer; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The `nodes` node type, ordered by `v`.
pub fn nodes_descriptor() -> NodeTypeDescriptor {
    NodeTypeDescriptor::new("node", "nodes")
        .with_self_reference("parent_id")
        .with_column(ColumnDescriptor::new("name", "varchar(32)"))
        .with_column(ColumnDescriptor::new("v", "integer"))
        .with_order_by("v".into())
}

pub fn nodes_hierarchy(traversal: &str) -> Hierarchy {
    Hierarchy::from_descriptor(&nodes_descriptor().with_traversal(traversal))
        .expect("nodes descriptor must validate")
}

/// The `folders` node type, ordered by name.
pub fn folders_hierarchy() -> Hierarchy {
    Hierarchy::from_descriptor(
        &NodeTypeDescriptor::new("folder", "folders")
            .with_primary_key("id", "uuid")
            .with_self_reference("parent_id")
            .with_column(ColumnDescriptor::new("name", "varchar(64)"))
            .with_order_by("name".into()),
    )
    .expect("folders descriptor must validate")
}

/// The `categories` node type, keyed and ordered by varchar columns.
pub fn categories_hierarchy() -> Hierarchy {
    Hierarchy::from_descriptor(
        &NodeTypeDescriptor::new("category", "categories")
            .with_primary_key("code", "varchar(16)")
            .with_self_reference("parent")
            .with_column(ColumnDescriptor::new("name", "varchar(64)"))
            .with_order_by("name".into()),
    )
    .expect("categories descriptor must validate")
}

/// Names of `nodes`, in the order given.
pub fn names(nodes: &[pg_cte_tree::Node]) -> Vec<String> {
    nodes
        .iter()
        .map(|n| {
            n.get("name")
                .ok()
                .and_then(|v| v.as_str())
                .unwrap_or("?")
                .to_string()
        })
        .collect()
}
