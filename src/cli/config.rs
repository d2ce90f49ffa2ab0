//! Optional TOML defaults
//!
//! ```toml
//! [compare]
//! key = "submitter_id"
//! ignore = ["group", "project_id"]
//!
//! [patch]
//! patches_per_slide = 20
//! size = 512
//! ```
//!
//! Command-line flags win over the file; the file wins over built-in defaults.

use crate::utils::validation;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub compare: CompareSection,
    pub patch: PatchSection,
    pub ingest: IngestSection,
    pub models: ModelsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareSection {
    pub key: String,
    pub ignore: Vec<String>,
    pub report: Option<PathBuf>,
}

impl Default for CompareSection {
    fn default() -> Self {
        Self {
            key: crate::data::SUBMITTER_ID.to_string(),
            ignore: vec!["group".to_string()],
            report: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchSection {
    pub patches_per_slide: usize,
    pub size: u32,
    pub level: usize,
    pub target_class: u32,
    pub min_class_area_ratio: f64,
    pub seed: Option<u64>,
}

impl Default for PatchSection {
    fn default() -> Self {
        Self {
            patches_per_slide: 10,
            size: crate::wsi::DEFAULT_PATCH_SIZE,
            level: 0,
            target_class: 1,
            min_class_area_ratio: 0.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    /// Empty means every modality
    pub modalities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    pub output_size: usize,
    pub n_genes: usize,
    pub fusion: String,
    pub seed: Option<u64>,
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            output_size: 512,
            n_genes: 2000,
            fusion: "cat".to_string(),
            seed: None,
        }
    }
}

impl PipelineConfig {
    /// Read a TOML file, or the built-in defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config: {:?}", path))?;
                let config: Self =
                    toml::from_str(&content).with_context(|| format!("Invalid config: {:?}", path))?;
                debug!("Loaded config from {:?}", path);
                config
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validation::positive(self.patch.patches_per_slide, "patch.patches_per_slide")?;
        validation::positive(self.patch.size, "patch.size")?;
        validation::in_range(self.patch.min_class_area_ratio, 0.0, 1.0, "patch.min_class_area_ratio")?;
        validation::positive(self.models.output_size, "models.output_size")?;
        validation::positive(self.models.n_genes, "models.n_genes")?;
        Ok(())
    }
}
