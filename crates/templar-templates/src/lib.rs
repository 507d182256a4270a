//! Templar Templates - named SQL statements resolved at call time
//!
//! This crate holds the in-memory template registry the engine resolves
//! template identifiers against, and the sources a registry is refreshed from.
//!
//! ## Features
//!
//! - **Generations**: every refresh publishes a complete, immutable snapshot;
//!   readers see either the old or the new one, never a mix
//! - **Sources**: `TableTemplateSource` reads `template_id, query_string`
//!   rows from a table over a pooled connection
//! - **SQL Filters**: `sqlquote`, `identifier`, `literal` for the textual
//!   binding fallback
//!
//! ## Example
//!
//! ```rust,ignore
//! use templar_templates::{TableTemplateSource, TemplateRegistry};
//!
//! let registry = TemplateRegistry::new();
//! let source = TableTemplateSource::new(pool.clone(), "db_template")?;
//! registry.refresh(&source).await?;
//!
//! let template = registry.resolve("monthly_totals")?;
//! println!("{}", template.sql_text);
//! ```

mod filters;
mod registry;
mod source;
mod template;

pub use filters::SqlFilters;
pub use registry::{TemplateGeneration, TemplateRegistry};
pub use source::{StaticTemplateSource, TableTemplateSource, TemplateSource};
pub use template::Template;
