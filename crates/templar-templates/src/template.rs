use serde::{Deserialize, Serialize};

/// A named SQL statement with placeholders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub sql_text: String,
}

impl Template {
    pub fn new(id: impl Into<String>, sql_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sql_text: sql_text.into(),
        }
    }
}
