//! Sub-models for multimodal survival prediction
//!
//! One feature extractor per modality, each producing a vector of the same
//! size, and a [`fusion::Fusion`] layer combining them.

pub mod architecture;
pub mod fc;
pub mod fusion;

pub use architecture::{ClinicalNet, ClinicalNetConfig, CnvNet, CnvNetConfig, WsiNet, WsiNetConfig};
pub use fc::{Fc, FcConfig};
pub use fusion::{Fusion, FusionConfig, FusionMethod};

use burn::prelude::*;
use serde::Serialize;
use thiserror::Error;

/// Hidden widths considered by [`pick_n_neurons`]
pub const NEURON_CANDIDATES: [usize; 7] = [128, 256, 512, 1024, 2048, 4096, 8192];

/// Model construction and shape errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("\"n_layers\" must be positive.")]
    InvalidLayerCount,

    #[error("Unknown fusion method '{0}', expected one of cat, max, sum, prod, embrace, attention")]
    UnknownFusion(String),

    #[error("\"feature_size\" is required if method is \"attention\"")]
    MissingFeatureSize,

    #[error("Expected {expected} {what}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("No {0} given")]
    EmptyInput(&'static str),
}

/// Smallest candidate width that fits `n_features`, capped at 8192
pub fn pick_n_neurons(n_features: usize) -> usize {
    NEURON_CANDIDATES
        .iter()
        .copied()
        .find(|&size| size >= n_features)
        .unwrap_or(NEURON_CANDIDATES[NEURON_CANDIDATES.len() - 1])
}

/// Shape and size of one built sub-model
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub parameters: usize,
    pub output_dims: Vec<usize>,
}

/// Settings for [`build_summaries`]
#[derive(Config, Debug)]
pub struct SubModelsConfig {
    /// Feature vector size shared by all modalities
    #[config(default = "512")]
    pub output_size: usize,

    #[config(default = "2000")]
    pub n_genes: usize,

    /// Patch edge of the zero batch run through the WSI net
    #[config(default = "64")]
    pub patch_size: usize,

    #[config(default = "2")]
    pub n_views: usize,

    pub fusion: FusionMethod,

    /// Seed of the fusion layer's random draws
    #[config(default = "None")]
    pub seed: Option<u64>,
}

/// Build every sub-model and run a zero batch of two samples through it
pub fn build_summaries<B: Backend>(
    config: &SubModelsConfig,
    device: &B::Device,
) -> Result<Vec<ModelSummary>, ModelError> {
    const BATCH: usize = 2;
    let mut summaries = Vec::new();

    let clinical = ClinicalNetConfig::new(config.output_size).init::<B>(device)?;
    let n_cat = clinical.n_categorical();
    let out = clinical.forward(
        Tensor::<B, 2, Int>::zeros([BATCH, n_cat], device),
        Tensor::<B, 2>::zeros([BATCH, 1], device),
    )?;
    summaries.push(summary::<B, _>("clinical", &clinical, out.dims()));

    let cnv = CnvNetConfig::new(config.output_size)
        .with_n_genes(config.n_genes)
        .init::<B>(device)?;
    let out = cnv.forward(Tensor::<B, 2, Int>::zeros([BATCH, config.n_genes], device))?;
    summaries.push(summary::<B, _>("cnv", &cnv, out.dims()));

    let wsi = WsiNetConfig::new(config.output_size).init::<B>(device)?;
    let views = (0..config.n_views)
        .map(|_| Tensor::<B, 4>::zeros([BATCH, 3, config.patch_size, config.patch_size], device))
        .collect();
    let out = wsi.forward(views)?;
    summaries.push(summary::<B, _>("wsi", &wsi, out.dims()));

    let fusion = FusionConfig::new(config.fusion)
        .with_feature_size(Some(config.output_size))
        .with_seed(config.seed)
        .init::<B>(device)?;
    let stacked = Tensor::<B, 3>::zeros([3, BATCH, config.output_size], device);
    let out = fusion.forward(stacked);
    summaries.push(summary::<B, _>(&format!("fusion ({})", config.fusion), &fusion, out.dims()));

    Ok(summaries)
}

fn summary<B: Backend, M: Module<B>>(name: &str, module: &M, dims: [usize; 2]) -> ModelSummary {
    ModelSummary {
        name: name.to_string(),
        parameters: module.num_params(),
        output_dims: dims.to_vec(),
    }
}
