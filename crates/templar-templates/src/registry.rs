//! Template registry with whole-generation replacement
//!
//! The registry holds one `Arc<TemplateGeneration>` behind a lock that is only
//! taken long enough to clone or swap the pointer. Lookups work on the
//! snapshot they cloned, so a refresh running concurrently never shows a
//! reader templates from two generations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use templar_core::{Result, TemplarError};

use crate::{Template, TemplateSource};


/// One complete, immutable snapshot of the registry
#[derive(Debug)]
pub struct TemplateGeneration {
    number: u64,
    loaded_at: DateTime<Utc>,
    templates: HashMap<String, Template>,
}

impl TemplateGeneration {
    fn new(number: u64, templates: HashMap<String, Template>) -> Self {
        Self {
            number,
            loaded_at: Utc::now(),
            templates,
        }
    }

    /// Monotonically increasing generation number, 0 for the empty initial one
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }
}

/// In-memory mapping from template id to SQL text
pub struct TemplateRegistry {
    current: RwLock<Arc<TemplateGeneration>>,
}

impl TemplateRegistry {
    /// Create an empty registry (generation 0)
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(TemplateGeneration::new(0, HashMap::new()))),
        }
    }

    /// Reload every template from `source` and publish them as a new generation.
    ///
    /// All or nothing: if the source fails, the current generation stays in
    /// place and the error is reported as `SourceUnavailable`. Returns the
    /// number of templates published.
    #[tracing::instrument(skip(self, source), fields(source = %source.describe()))]
    pub async fn refresh(&self, source: &dyn TemplateSource) -> Result<usize> {
        let templates = source.load().await.map_err(|e| {
            tracing::error!(error = %e, "template refresh failed, keeping current generation");
            match e {
                TemplarError::SourceUnavailable(msg) => TemplarError::SourceUnavailable(msg),
                other => TemplarError::SourceUnavailable(other.to_string()),
            }
        })?;

        let count = self.replace(templates);
        Ok(count)
    }

    /// Publish `templates` as a new generation, replacing the current one.
    ///
    /// Duplicate ids keep the last occurrence.
    pub fn replace(&self, templates: Vec<Template>) -> usize {
        let mut map = HashMap::with_capacity(templates.len());
        for template in templates {
            if let Some(previous) = map.insert(template.id.clone(), template) {
                tracing::warn!(template_id = %previous.id, "duplicate template id, keeping the last one");
            }
        }
        let count = map.len();

        let mut current = self.current.write();
        let number = current.number + 1;
        *current = Arc::new(TemplateGeneration::new(number, map));
        drop(current);

        tracing::info!(generation = number, templates = count, "published template generation");
        count
    }

    /// Look up a template in the current generation
    pub fn resolve(&self, id: &str) -> Result<Template> {
        self.snapshot()
            .get(id)
            .cloned()
            .ok_or_else(|| TemplarError::NotFound(id.to_string()))
    }

    /// Copy of every id and SQL text in the current generation
    pub fn list_all(&self) -> BTreeMap<String, String> {
        self.snapshot()
            .iter()
            .map(|t| (t.id.clone(), t.sql_text.clone()))
            .collect()
    }

    /// The current generation, for callers needing several consistent lookups
    pub fn snapshot(&self) -> Arc<TemplateGeneration> {
        Arc::clone(&self.current.read())
    }

    pub fn generation(&self) -> u64 {
        self.current.read().number
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
