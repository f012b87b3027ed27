//! Built-in model catalog
//!
//! The set of models the front-end offers is compiled in from
//! `builtin_models.toml` and never changes for the life of the process.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Identifier understood by the upstream provider.
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelDescriptor>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("model catalog is empty")]
    Empty,

    #[error("model `{0}` is listed more than once")]
    DuplicateId(String),

    #[error("failed to parse model catalog: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Result<Self, CatalogError> {
        if models.is_empty() {
            return Err(CatalogError::Empty);
        }
        for (index, model) in models.iter().enumerate() {
            if models[..index].iter().any(|earlier| earlier.id == model.id) {
                return Err(CatalogError::DuplicateId(model.id.clone()));
            }
        }
        Ok(Self { models })
    }

    /// Load the catalog embedded at build time.
    pub fn builtin() -> Result<Self, CatalogError> {
        const CATALOG_CONTENT: &str = include_str!("builtin_models.toml");
        Self::from_toml(CATALOG_CONTENT)
    }

    pub fn from_toml(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(content)?;
        Self::new(file.models)
    }

    pub fn list(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Exact, case-sensitive lookup; provider ids are case-sensitive.
    pub fn resolve(&self, id: &str) -> Result<&ModelDescriptor, CatalogError> {
        self.models
            .iter()
            .find(|model| model.id == id)
            .ok_or_else(|| CatalogError::UnknownModel(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resolve(id).is_ok()
    }

    pub fn default_model(&self) -> &ModelDescriptor {
        // `new` rejects empty catalogs
        &self.models[0]
    }

    /// Distinct categories in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for model in &self.models {
            if !seen.contains(&model.category.as_str()) {
                seen.push(&model.category);
            }
        }
        seen
    }

    pub fn by_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a ModelDescriptor> + 'a {
        self.models
            .iter()
            .filter(move |model| model.category == category)
    }
}
