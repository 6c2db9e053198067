//! Concrete [`Storage`](crate::storage::Storage) implementations.

pub mod postgres;
