//! Model registry snapshot
//!
//! Models are trained and validated elsewhere; the aggregator reads the
//! current set keyed by model name (the ordered stop ids it covers).

use crate::models::Model;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

pub type ModelSnapshot = Arc<HashMap<String, Model>>;

/// Source of the current model set
pub trait ModelRegistry: Send + Sync {
    fn current_models(&self) -> ModelSnapshot;
}

/// Registry holding a replaceable in-memory snapshot
#[derive(Debug, Default)]
pub struct StaticModelRegistry {
    models: RwLock<ModelSnapshot>,
}

impl StaticModelRegistry {
    pub fn new(models: impl IntoIterator<Item = Model>) -> Self {
        Self {
            models: RwLock::new(Arc::new(index(models))),
        }
    }

    /// Load a JSON array of models
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model snapshot {:?}", path))?;
        let models: Vec<Model> =
            serde_json::from_str(&content).context("Failed to parse model snapshot")?;
        info!(path = ?path, models = models.len(), "Loaded model snapshot");
        Ok(Self::new(models))
    }

    /// Swap in a new model set; predictors built afterwards see it
    pub fn replace(&self, models: impl IntoIterator<Item = Model>) {
        let snapshot = Arc::new(index(models));
        *self.models.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

impl ModelRegistry for StaticModelRegistry {
    fn current_models(&self) -> ModelSnapshot {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn index(models: impl IntoIterator<Item = Model>) -> HashMap<String, Model> {
    models.into_iter().map(|m| (m.name.clone(), m)).collect()
}
