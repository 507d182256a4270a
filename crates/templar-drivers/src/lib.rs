//! Templar Drivers - Database driver implementations
//!
//! This crate provides concrete implementations of the driver and connection
//! traits defined in `templar-core`, selected with cargo features.

#[cfg(feature = "postgres")]
pub use templar_driver_postgres as postgres;
#[cfg(feature = "sqlite")]
pub use templar_driver_sqlite as sqlite;

mod registry;

pub use registry::DriverRegistry;

/// Re-export commonly used types from templar-core
pub use templar_core::{
    Connection, DataSourceConfig, DatabaseDriver, PlaceholderStyle, QueryResult, Result, Row,
    StatementResult, TemplarError, Transaction, Value,
};
