//! Connection pooling for backend connections
//!
//! This module provides connection pooling with configurable pool sizes,
//! timeouts, connection lifetimes and statistics tracking.
//!
//! # Example
//!
//! ```ignore
//! use templar_connection::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(5, 10)
//!     .with_acquire_timeout_ms(5000)
//!     .with_max_lifetime_ms(1_800_000);
//!
//! let pool = ConnectionPool::new(config, connection_factory);
//! pool.warm_up().await?;
//! let conn = pool.get().await?;
//! // Use connection...
//! conn.release();
//! ```

mod config;
mod pool;
mod stats;


pub use config::PoolConfig;
pub use pool::{ConnectionFactory, ConnectionPool, PooledConnection};
pub use stats::PoolStats;
