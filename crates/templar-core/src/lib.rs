//! Templar Core - Core abstractions for the template-driven query engine
//!
//! This crate provides the fundamental traits and types that all other
//! Templar crates depend on. It defines:
//!
//! - `DatabaseDriver` - Trait for backends that open connections
//! - `Connection` - Trait for backend connections
//! - `RowCursor` - Lazily produced, cancellable row sequence
//! - `ProcedureCall` - Driver-level description of a stored procedure call
//! - Common types like `Value`, `Row`, `SqlType`, and the `TemplarError` taxonomy

mod connection;
mod cursor;
mod driver;
mod error;
mod procedure;
mod types;

pub use connection::*;
pub use cursor::*;
pub use driver::*;
pub use error::*;
pub use procedure::*;
pub use types::*;
