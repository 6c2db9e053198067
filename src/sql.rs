//! SQL text helpers shared by the query builder and the filter layer.

use crate::value::Value;

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Build a comma-separated list of quoted column references.
pub fn col_list(cols: &[String]) -> String {
    cols.iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `prefix."col"` for a column of an aliased relation.
pub fn qualified(prefix: &str, col: &str) -> String {
    format!("{prefix}.{}", quote_ident(col))
}

/// Whether a declared column type is variable-width character data, which
/// cannot be mixed with `text` inside an array without a cast.
pub fn is_varchar(sql_type: &str) -> bool {
    let t = sql_type.trim().to_ascii_lowercase();
    t.starts_with("varchar") || t.starts_with("character varying")
}

/// Column expression inside the recursive CTE body (relation alias `T`),
/// applying an explicit cast if given, else casting varchar to text.
pub fn cast_column(col: &str, sql_type: &str, explicit: Option<&str>) -> String {
    match explicit {
        Some(cast) => format!("CAST (T.{} AS {cast})", quote_ident(col)),
        None if is_varchar(sql_type) => format!("CAST (T.{} AS TEXT)", quote_ident(col)),
        None => format!("T.{}", quote_ident(col)),
    }
}

/// Bound parameters of a statement, numbered `$1..$n` in push order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Vec<Value>,
}

impl Params {
    pub fn new() -> Self {
        Params { values: Vec::new() }
    }

    /// Append a value and return its placeholder.
    pub fn push(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        format!("${}", self.values.len())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}
