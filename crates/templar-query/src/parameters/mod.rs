//! SQL Parameter Extraction and Binding
//!
//! Templates carry one of three placeholder styles:
//!
//! - Named parameters: `:name` (`::type` casts are not placeholders)
//! - Positional parameters: `?`
//! - Numbered parameters: `$1`, `$2`
//!
//! Binding resolves every placeholder against a `ParameterSet`, infers a type
//! for untyped values and rewrites the SQL to the driver's placeholder style.
//!
//! # Example
//!
//! ```ignore
//! use templar_query::parameters::{ParameterBinder, ParameterSet};
//!
//! let params = ParameterSet::named([("id", "42"), ("since", "01/02/2024 09.30")]);
//! let bound = binder.bind("SELECT * FROM t WHERE id = :id AND ts > :since", &params)?;
//! // bound.sql == "SELECT * FROM t WHERE id = $1 AND ts > $2"
//! // bound.values == [Int(42), Timestamp(2024-02-01 09:30)]
//! ```

pub mod binder;
mod extractor;
mod inference;
mod values;

pub use binder::{BoundStatement, BoundValue, ParameterBinder};
pub use extractor::{Placeholder, PlaceholderMatch, extract_placeholders};
pub use inference::TypeInference;
pub use values::{ParamValue, ParameterSet};

#[cfg(test)]
mod tests;
