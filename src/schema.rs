//! Validated hierarchy schema and the registry that owns it.
//!
//! [`validate`] turns a [`NodeTypeDescriptor`] into an immutable
//! [`HierarchySchema`], resolving the parent column and filling defaults.
//! The [`SchemaRegistry`] is built during application bootstrap and hands
//! out shared references; each node type is validated at most once, under a
//! lock, so concurrent first use cannot race.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{
    ColumnDescriptor, ConfigDocument, DEFAULT_CHILDREN_NAME, DEFAULT_CTE_NAME,
    DEFAULT_DEPTH_COLUMN, DEFAULT_ORDERING_COLUMN, DEFAULT_PATH_COLUMN, DeletePolicy,
    NodeTypeDescriptor, TraversalMode,
};
use crate::error::ConfigError;
use crate::hierarchy::Hierarchy;
use crate::sql::{cast_column, quote_ident};

/// One resolved `order_by` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKeyColumn {
    pub column: String,
    pub sql_type: String,
    /// Explicit cast; takes precedence over automatic varchar handling.
    pub cast: Option<String>,
}

/// Immutable, validated configuration of one node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchySchema {
    pub node_type: String,
    pub table: String,
    pub table_schema: Option<String>,
    pub primary_key: ColumnDescriptor,
    pub parent_column: String,
    pub children_relation: String,
    pub traversal: TraversalMode,
    pub order_by: Vec<OrderKeyColumn>,
    pub delete_policy: DeletePolicy,
    pub primary_key_cast: Option<String>,
    pub cte_name: String,
    pub depth_column: String,
    pub path_column: String,
    pub ordering_column: String,
    pub columns: Vec<ColumnDescriptor>,
}

/// Validate a descriptor. Steps run in a fixed order so the first problem
/// reported is deterministic: parent column resolution, self-reference
/// check, traversal, delete policy, then defaults.
pub fn validate(descriptor: &NodeTypeDescriptor) -> Result<HierarchySchema, ConfigError> {
    let node_type = descriptor.name.clone();

    // Parent column: explicit name first, otherwise the unique self-reference.
    let parent_column = match &descriptor.parent_column {
        Some(name) => name.clone(),
        None => {
            let candidates: Vec<String> = descriptor
                .columns
                .iter()
                .filter(|c| c.references.as_deref() == Some(node_type.as_str()))
                .map(|c| c.name.clone())
                .collect();
            match candidates.len() {
                0 => return Err(ConfigError::MissingParentReference(node_type)),
                1 => candidates[0].clone(),
                _ => {
                    return Err(ConfigError::AmbiguousParentReference {
                        node_type,
                        candidates,
                    });
                }
            }
        }
    };

    let self_references = descriptor
        .columns
        .iter()
        .find(|c| c.name == parent_column)
        .is_some_and(|c| c.references.as_deref() == Some(node_type.as_str()));
    if !self_references {
        return Err(ConfigError::InvalidParentReference {
            node_type,
            column: parent_column,
        });
    }

    let traversal = match &descriptor.traversal {
        Some(raw) => TraversalMode::parse(raw)?,
        None => TraversalMode::default(),
    };

    let delete_policy = match &descriptor.delete_policy {
        Some(raw) => DeletePolicy::parse(raw)?,
        None => DeletePolicy::default(),
    };

    let primary_key = descriptor
        .columns
        .iter()
        .find(|c| c.name == descriptor.primary_key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingPrimaryKey {
            node_type: node_type.clone(),
            column: descriptor.primary_key.clone(),
        })?;

    let mut order_by = Vec::with_capacity(descriptor.order_by.len());
    for entry in &descriptor.order_by {
        let column = descriptor
            .columns
            .iter()
            .find(|c| c.name == entry.column())
            .ok_or_else(|| ConfigError::UnknownOrderColumn {
                node_type: node_type.clone(),
                column: entry.column().to_string(),
            })?;
        order_by.push(OrderKeyColumn {
            column: column.name.clone(),
            sql_type: column.sql_type.clone(),
            cast: entry.cast().map(str::to_string),
        });
    }

    let depth_column = descriptor
        .depth_column
        .clone()
        .unwrap_or_else(|| DEFAULT_DEPTH_COLUMN.to_string());
    let path_column = descriptor
        .path_column
        .clone()
        .unwrap_or_else(|| DEFAULT_PATH_COLUMN.to_string());
    let ordering_column = descriptor
        .ordering_column
        .clone()
        .unwrap_or_else(|| DEFAULT_ORDERING_COLUMN.to_string());

    let virtuals = [&depth_column, &path_column, &ordering_column];
    for (i, name) in virtuals.iter().enumerate() {
        let clashes_with_table = descriptor.columns.iter().any(|c| &c.name == *name);
        let clashes_with_virtual = virtuals[..i].contains(name);
        if clashes_with_table || clashes_with_virtual {
            return Err(ConfigError::VirtualColumnConflict {
                node_type,
                column: (*name).clone(),
            });
        }
    }

    // The recursive CTE would shadow the table it selects from.
    let cte_name = descriptor
        .cte_name
        .clone()
        .unwrap_or_else(|| DEFAULT_CTE_NAME.to_string());
    if cte_name == descriptor.table {
        return Err(ConfigError::CteNameConflict {
            node_type,
            cte_name,
        });
    }

    Ok(HierarchySchema {
        node_type,
        table: descriptor.table.clone(),
        table_schema: descriptor.table_schema.clone(),
        primary_key,
        parent_column,
        children_relation: descriptor
            .children_relation
            .clone()
            .unwrap_or_else(|| DEFAULT_CHILDREN_NAME.to_string()),
        traversal,
        order_by,
        delete_policy,
        primary_key_cast: descriptor.primary_key_cast.clone(),
        cte_name,
        depth_column,
        path_column,
        ordering_column,
        columns: descriptor.columns.clone(),
    })
}

impl HierarchySchema {
    /// Table name as it appears in `FROM`, schema-qualified when configured.
    pub fn qualified_table(&self) -> String {
        match &self.table_schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.table)),
            None => quote_ident(&self.table),
        }
    }

    /// Alias under which the base table is referenced in the outer query.
    pub fn table_alias(&self) -> String {
        quote_ident(&self.table)
    }

    pub fn cte_alias(&self) -> String {
        quote_ident(&self.cte_name)
    }

    pub fn pk_name(&self) -> &str {
        &self.primary_key.name
    }

    /// Primary key expression used inside the path array.
    pub fn pk_path_expr(&self) -> String {
        cast_column(
            &self.primary_key.name,
            &self.primary_key.sql_type,
            self.primary_key_cast.as_deref(),
        )
    }

    /// Per-node ordering key: one array per `order_by` column, concatenated.
    /// Falls back to the primary key when no ordering is configured. A cast
    /// written in `order_by` beats `primary_key_cast` for the primary key.
    pub fn order_key_expr(&self) -> String {
        if self.order_by.is_empty() {
            return format!("array[{}]", self.pk_path_expr());
        }
        self.order_by
            .iter()
            .map(|o| {
                let explicit = o.cast.as_deref().or_else(|| {
                    if o.column == self.primary_key.name {
                        self.primary_key_cast.as_deref()
                    } else {
                        None
                    }
                });
                format!("array[{}]", cast_column(&o.column, &o.sql_type, explicit))
            })
            .collect::<Vec<_>>()
            .join(" || ")
    }

    /// Whether `name` is one of the three virtual columns.
    pub fn is_virtual_column(&self, name: &str) -> bool {
        name == self.depth_column || name == self.path_column || name == self.ordering_column
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// Registry of validated schemas keyed by node type name.
///
/// Owned by the application; pass it (or the [`Hierarchy`] handles it hands
/// out) to the query and mutation APIs.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: Mutex<HashMap<String, Arc<HierarchySchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Validate every node type of a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let doc = ConfigDocument::from_toml_str(s)?;
        let registry = SchemaRegistry::new();
        for descriptor in &doc.node_types {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Validate and store a node type. Registering an already-known name is
    /// a no-op returning the schema validated the first time.
    pub fn register(
        &self,
        descriptor: &NodeTypeDescriptor,
    ) -> Result<Arc<HierarchySchema>, ConfigError> {
        let mut schemas = self.schemas.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = schemas.get(&descriptor.name) {
            return Ok(Arc::clone(existing));
        }
        let schema = Arc::new(validate(descriptor)?);
        tracing::info!(
            node_type = %schema.node_type,
            table = %schema.table,
            parent = %schema.parent_column,
            traversal = %schema.traversal,
            delete_policy = %schema.delete_policy,
            "registered hierarchy node type"
        );
        schemas.insert(descriptor.name.clone(), Arc::clone(&schema));
        Ok(schema)
    }

    pub fn get(&self, node_type: &str) -> Result<Arc<HierarchySchema>, ConfigError> {
        self.schemas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_type)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownNodeType(node_type.to_string()))
    }

    /// Query/mutation handle for a registered node type.
    pub fn hierarchy(&self, node_type: &str) -> Result<Hierarchy, ConfigError> {
        self.get(node_type).map(Hierarchy::new)
    }

    pub fn len(&self) -> usize {
        self.schemas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
