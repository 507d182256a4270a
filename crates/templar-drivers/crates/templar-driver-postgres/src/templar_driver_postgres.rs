//! PostgreSQL database driver implementation

mod connection;
mod driver;
mod types;

pub use connection::{PostgresCancelHandle, PostgresConnection, PostgresTransaction};
pub use driver::PostgresDriver;
