//! Storage collaborator contract.
//!
//! The engine only needs to send a statement with bound parameters and get
//! rows back. Anything that speaks SQL to PostgreSQL can implement
//! [`Storage`]; the crate ships an implementation for the synchronous
//! `postgres` client in [`crate::backend::postgres`].
//!
//! The engine never opens transactions. Callers that need a multi-row
//! mutation (e.g. promoting several children) to be atomic pass a
//! transaction handle as the storage.

use crate::error::TreeError;
use crate::value::Value;

/// A decoded result row: column names paired with values, in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.push(column.into());
        self.values.push(value.into());
    }

    /// Builder-style [`Row::push`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    /// Value of the first column with this name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Executes SQL on behalf of the engine. One call is one round trip.
pub trait Storage {
    /// Run a statement returning rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, TreeError>;

    /// Run a statement returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, TreeError>;
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, TreeError> {
        (**self).query(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, TreeError> {
        (**self).execute(sql, params)
    }
}
