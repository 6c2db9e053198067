//! Storage over the synchronous `postgres` client.
//!
//! Both `postgres::Client` and `postgres::Transaction` implement
//! [`Storage`]; use a transaction to make a multi-step deletion policy
//! atomic. Rows are decoded into [`Value`]s here, so array-valued virtual
//! columns reach the engine as `Value::Array` regardless of element type.
//!
//! # Type mapping
//!
//! | PostgreSQL | `Value` |
//! |------------|---------|
//! | `bool` | `Bool` |
//! | `int2`, `int4`, `int8`, `oid` | `Int` |
//! | `float4`, `float8` | `Float` |
//! | `numeric` | `Decimal` |
//! | `text`, `varchar`, `bpchar`, `name` | `Text` |
//! | `json`, `jsonb` | `Text` (serialized) |
//! | `bytea` | `Bytes` |
//! | `uuid` | `Uuid` |
//! | `date`, `timestamp`, `timestamptz` | `Date`, `Timestamp`, `TimestampTz` |
//! | one-dimensional arrays of the above | `Array` |
//!
//! Any other column type (and a `numeric` that does not fit a `Decimal`,
//! such as `NaN`) decodes to `Bytes` holding the server's binary
//! representation, so selecting such a column never fails a query. Cast it
//! in the schema (e.g. `order_by = [{ column = "span", cast = "text" }]`)
//! to get a readable value.
//!
//! Parameters are encoded against the type the server inferred for the
//! placeholder. A value that cannot be represented as that type fails with
//! [`TreeError::InvalidArgument`] naming both types.

use std::error::Error;
use std::fmt;

use bytes::BytesMut;
use postgres::types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};
use postgres::{Client, GenericClient, Transaction};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

use crate::error::TreeError;
use crate::storage::{Row, Storage};
use crate::value::Value;

type BoxError = Box<dyn Error + Sync + Send>;

/// A parameter that cannot be encoded as its placeholder's type.
#[derive(Debug, thiserror::Error)]
#[error("cannot bind {value} value as {ty}: {reason}")]
struct BindError {
    value: &'static str,
    ty: Type,
    reason: String,
}

fn bind_error(value: &Value, ty: &Type, reason: impl fmt::Display) -> BoxError {
    Box::new(BindError {
        value: value.type_name(),
        ty: ty.clone(),
        reason: reason.to_string(),
    })
}

fn convert<T, E: fmt::Display>(value: &Value, ty: &Type, r: Result<T, E>) -> Result<T, BoxError> {
    r.map_err(|e| bind_error(value, ty, e))
}

/// Encode `v` only if its `ToSql` impl accepts `ty`.
fn checked<T: ToSql>(value: &Value, v: T, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if !T::accepts(ty) {
        return Err(bind_error(value, ty, "incompatible parameter type"));
    }
    v.to_sql(ty, out)
}

fn is_text(ty: &Type) -> bool {
    matches!(*ty, Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME)
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => checked(self, *v, ty, out),
            Value::Int(v) => match *ty {
                Type::INT2 => checked(self, convert(self, ty, i16::try_from(*v))?, ty, out),
                Type::INT4 => checked(self, convert(self, ty, i32::try_from(*v))?, ty, out),
                Type::OID => checked(self, convert(self, ty, u32::try_from(*v))?, ty, out),
                Type::FLOAT4 => checked(self, *v as f32, ty, out),
                Type::FLOAT8 => checked(self, *v as f64, ty, out),
                Type::NUMERIC => checked(self, Decimal::from(*v), ty, out),
                ref t if is_text(t) => checked(self, v.to_string(), ty, out),
                _ => checked(self, *v, ty, out),
            },
            Value::Float(v) => match *ty {
                Type::FLOAT4 => checked(self, *v as f32, ty, out),
                Type::NUMERIC => checked(self, convert(self, ty, Decimal::try_from(*v))?, ty, out),
                _ => checked(self, *v, ty, out),
            },
            Value::Decimal(v) => match *ty {
                Type::FLOAT4 | Type::FLOAT8 => {
                    let f = v
                        .to_f64()
                        .ok_or_else(|| bind_error(self, ty, "out of float range"))?;
                    Value::Float(f).to_sql(ty, out)
                }
                ref t if is_text(t) => checked(self, v.to_string(), ty, out),
                _ => checked(self, *v, ty, out),
            },
            // Path elements cast to text come back as text but are compared
            // against the typed key column.
            Value::Text(v) => match *ty {
                Type::UUID => checked(self, convert(self, ty, Uuid::parse_str(v))?, ty, out),
                Type::INT2 => checked(self, convert(self, ty, v.parse::<i16>())?, ty, out),
                Type::INT4 => checked(self, convert(self, ty, v.parse::<i32>())?, ty, out),
                Type::INT8 => checked(self, convert(self, ty, v.parse::<i64>())?, ty, out),
                Type::NUMERIC => checked(self, convert(self, ty, v.parse::<Decimal>())?, ty, out),
                Type::JSON | Type::JSONB => {
                    let json: serde_json::Value = convert(self, ty, serde_json::from_str(v))?;
                    checked(self, json, ty, out)
                }
                // Enum labels travel as their text in the binary protocol.
                _ if matches!(ty.kind(), Kind::Enum(_)) => {
                    out.extend_from_slice(v.as_bytes());
                    Ok(IsNull::No)
                }
                _ => checked(self, v.as_str(), ty, out),
            },
            Value::Bytes(v) => checked(self, v.as_slice(), ty, out),
            Value::Uuid(v) => match *ty {
                ref t if is_text(t) => checked(self, v.to_string(), ty, out),
                _ => checked(self, *v, ty, out),
            },
            Value::Date(v) => checked(self, *v, ty, out),
            Value::Timestamp(v) => checked(self, *v, ty, out),
            Value::TimestampTz(v) => checked(self, *v, ty, out),
            Value::Array(_) => Err(bind_error(self, ty, "arrays cannot be bound as parameters")),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Undecoded column bytes for types without a `Value` mapping.
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(RawValue(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn scalar<'a, T, F>(row: &'a postgres::Row, idx: usize, wrap: F) -> Result<Value, TreeError>
where
    T: postgres::types::FromSql<'a>,
    F: Fn(T) -> Value,
{
    let v: Option<T> = row.try_get(idx).map_err(TreeError::storage)?;
    Ok(v.map_or(Value::Null, wrap))
}

fn array<'a, T, F>(row: &'a postgres::Row, idx: usize, wrap: F) -> Result<Value, TreeError>
where
    T: postgres::types::FromSql<'a>,
    F: Fn(T) -> Value,
{
    let v: Option<Vec<Option<T>>> = row.try_get(idx).map_err(TreeError::storage)?;
    Ok(v.map_or(Value::Null, |items| {
        Value::Array(
            items
                .into_iter()
                .map(|item| item.map_or(Value::Null, &wrap))
                .collect(),
        )
    }))
}

fn raw(row: &postgres::Row, idx: usize) -> Result<Value, TreeError> {
    scalar(row, idx, |v: RawValue| Value::Bytes(v.0))
}

fn decode_column(row: &postgres::Row, idx: usize) -> Result<Value, TreeError> {
    let column = &row.columns()[idx];
    match *column.type_() {
        Type::BOOL => scalar(row, idx, Value::Bool),
        Type::INT2 => scalar(row, idx, |v: i16| Value::Int(v.into())),
        Type::INT4 => scalar(row, idx, |v: i32| Value::Int(v.into())),
        Type::INT8 => scalar(row, idx, Value::Int),
        Type::OID => scalar(row, idx, |v: u32| Value::Int(v.into())),
        Type::FLOAT4 => scalar(row, idx, |v: f32| Value::Float(v.into())),
        Type::FLOAT8 => scalar(row, idx, Value::Float),
        Type::NUMERIC => scalar(row, idx, Value::Decimal).or_else(|_| raw(row, idx)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => scalar(row, idx, Value::Text),
        Type::BYTEA => scalar(row, idx, Value::Bytes),
        Type::JSON | Type::JSONB => {
            scalar(row, idx, |v: serde_json::Value| Value::Text(v.to_string()))
        }
        Type::UUID => scalar(row, idx, Value::Uuid),
        Type::DATE => scalar(row, idx, Value::Date),
        Type::TIMESTAMP => scalar(row, idx, Value::Timestamp),
        Type::TIMESTAMPTZ => scalar(row, idx, Value::TimestampTz),

        Type::BOOL_ARRAY => array(row, idx, Value::Bool),
        Type::INT2_ARRAY => array(row, idx, |v: i16| Value::Int(v.into())),
        Type::INT4_ARRAY => array(row, idx, |v: i32| Value::Int(v.into())),
        Type::INT8_ARRAY => array(row, idx, Value::Int),
        Type::FLOAT4_ARRAY => array(row, idx, |v: f32| Value::Float(v.into())),
        Type::FLOAT8_ARRAY => array(row, idx, Value::Float),
        Type::NUMERIC_ARRAY => array(row, idx, Value::Decimal).or_else(|_| raw(row, idx)),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            array(row, idx, Value::Text)
        }
        Type::UUID_ARRAY => array(row, idx, Value::Uuid),
        Type::DATE_ARRAY => array(row, idx, Value::Date),
        Type::TIMESTAMP_ARRAY => array(row, idx, Value::Timestamp),
        Type::TIMESTAMPTZ_ARRAY => array(row, idx, Value::TimestampTz),

        ref other => {
            tracing::trace!(column = column.name(), sql_type = %other, "decoding as raw bytes");
            raw(row, idx)
        }
    }
}

/// Decode a `postgres` row into the engine's [`Row`].
pub fn decode_row(row: &postgres::Row) -> Result<Row, TreeError> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.push(column.name(), decode_column(row, idx)?);
    }
    Ok(out)
}

fn bind(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

/// Parameter encoding failures are caller mistakes; everything else is the
/// database's.
fn map_pg_error(e: postgres::Error) -> TreeError {
    match e.source().and_then(|source| source.downcast_ref::<BindError>()) {
        Some(bind) => TreeError::InvalidArgument(bind.to_string()),
        None => TreeError::storage(e),
    }
}

fn run_query<C: GenericClient>(client: &mut C, sql: &str, params: &[Value]) -> Result<Vec<Row>, TreeError> {
    client
        .query(sql, &bind(params))
        .map_err(map_pg_error)?
        .iter()
        .map(decode_row)
        .collect()
}

fn run_execute<C: GenericClient>(client: &mut C, sql: &str, params: &[Value]) -> Result<u64, TreeError> {
    client.execute(sql, &bind(params)).map_err(map_pg_error)
}

macro_rules! impl_storage {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Storage for $ty {
                fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, TreeError> {
                    run_query(self, sql, params)
                }

                fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, TreeError> {
                    run_execute(self, sql, params)
                }
            }
        )*
    };
}

impl_storage!(Client, Transaction<'_>);
