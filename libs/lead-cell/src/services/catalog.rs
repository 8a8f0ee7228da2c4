// libs/lead-cell/src/services/catalog.rs
use serde::Serialize;
use tracing::warn;

use crate::models::StageCatalogEntry;
use crate::stages::{pipeline_label, pipeline_order, StageDefinition, BUILTIN_STAGE_CATALOG};
use crate::store::LeadStore;

/// Stage catalog as read for a single operation. Never cached across calls.
#[derive(Debug, Clone, Serialize)]
pub struct StageCatalog {
    pub stages: Vec<StageCatalogEntry>,
    /// True when the table could not be read and the built-in copy is in use.
    pub degraded: bool,
}

impl StageCatalog {
    pub async fn load(store: &dyn LeadStore) -> Self {
        match store.fetch_stage_catalog().await {
            Ok(stages) if !stages.is_empty() => Self { stages, degraded: false },
            Ok(_) => {
                warn!("Stage catalog is empty, using built-in catalog");
                Self::builtin()
            }
            Err(e) => {
                warn!("Stage catalog unavailable ({}), using built-in catalog", e);
                Self::builtin()
            }
        }
    }

    pub fn builtin() -> Self {
        Self {
            stages: builtin_catalog_entries(),
            degraded: true,
        }
    }

    pub fn get(&self, stage_key: &str) -> Option<&StageCatalogEntry> {
        self.stages.iter().find(|s| s.stage_key == stage_key)
    }

    pub fn contains(&self, stage_key: &str) -> bool {
        self.get(stage_key).is_some_and(|s| s.is_active)
    }

    pub fn is_terminal(&self, stage_key: &str) -> bool {
        self.get(stage_key).is_some_and(|s| s.is_terminal)
    }
}

impl From<&StageDefinition> for StageCatalogEntry {
    fn from(def: &StageDefinition) -> Self {
        Self {
            stage_key: def.stage_key.to_string(),
            pipeline_key: def.pipeline_key.to_string(),
            pipeline_label: pipeline_label(def.pipeline_key).to_string(),
            label: def.label.to_string(),
            description: None,
            pipeline_order: pipeline_order(def.pipeline_key),
            order_index: def.order_index,
            is_terminal: def.is_terminal,
            is_active: true,
        }
    }
}

pub fn builtin_catalog_entries() -> Vec<StageCatalogEntry> {
    BUILTIN_STAGE_CATALOG.iter().map(StageCatalogEntry::from).collect()
}
