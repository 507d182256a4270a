//! Templar Connection - Connection sourcing and pooling
//!
//! This crate bounds how many backend connections the engine holds open and
//! hands them out to execution calls, one caller per connection at a time.

mod factory;
pub mod pool;

pub use factory::DriverConnectionFactory;
pub use pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use templar_core::DataSourceConfig;
