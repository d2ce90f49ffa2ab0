use super::ModelError;
use crate::utils::random::rng_from;
use burn::module::Ignored;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::softmax;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// How modality feature vectors are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    Cat,
    Max,
    Sum,
    Prod,
    Embrace,
    Attention,
}

impl FusionMethod {
    pub const ALL: [FusionMethod; 6] = [
        FusionMethod::Cat,
        FusionMethod::Max,
        FusionMethod::Sum,
        FusionMethod::Prod,
        FusionMethod::Embrace,
        FusionMethod::Attention,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FusionMethod::Cat => "cat",
            FusionMethod::Max => "max",
            FusionMethod::Sum => "sum",
            FusionMethod::Prod => "prod",
            FusionMethod::Embrace => "embrace",
            FusionMethod::Attention => "attention",
        }
    }
}

impl fmt::Display for FusionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FusionMethod {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| ModelError::UnknownFusion(s.to_string()))
    }
}

/// Fusion layer configuration
#[derive(Config, Debug)]
pub struct FusionConfig {
    pub method: FusionMethod,

    /// Modality feature size, required by `attention`
    #[config(default = "None")]
    pub feature_size: Option<usize>,

    /// Seed of the `embrace` modality draws, entropy when unset
    #[config(default = "None")]
    pub seed: Option<u64>,
}

impl FusionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Fusion<B>, ModelError> {
        let attention = match (self.method, self.feature_size) {
            (FusionMethod::Attention, Some(size)) if size > 0 => {
                Some(LinearConfig::new(size, 1).with_bias(true).init(device))
            }
            (FusionMethod::Attention, _) => return Err(ModelError::MissingFeatureSize),
            _ => None,
        };

        Ok(Fusion {
            method: Ignored(self.method),
            attention,
            rng: Ignored(Arc::new(Mutex::new(rng_from(self.seed)))),
        })
    }
}

/// Multimodal data aggregator
///
/// Input is `[modalities, batch, features]`. `cat` yields
/// `[batch, modalities * features]`, every other method `[batch, features]`.
#[derive(Module, Debug)]
pub struct Fusion<B: Backend> {
    method: Ignored<FusionMethod>,
    attention: Option<Linear<B>>,
    rng: Ignored<Arc<Mutex<ChaCha8Rng>>>,
}

impl<B: Backend> Fusion<B> {
    pub fn method(&self) -> FusionMethod {
        self.method.0
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        let mut rng = self.rng.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.forward_with(x, None, &mut *rng)
    }

    /// Forward with explicit modality availability and RNG for `embrace`
    ///
    /// `available[b][m]` tells whether modality `m` is present for sample `b`.
    pub fn forward_with<R: Rng + ?Sized>(
        &self,
        x: Tensor<B, 3>,
        available: Option<&[Vec<bool>]>,
        rng: &mut R,
    ) -> Tensor<B, 2> {
        let [modalities, batch, features] = x.dims();

        match self.method.0 {
            FusionMethod::Cat => x.swap_dims(0, 1).reshape([batch, modalities * features]),
            FusionMethod::Max => x.max_dim(0).squeeze::<2>(0),
            FusionMethod::Sum => x.sum_dim(0).squeeze::<2>(0),
            FusionMethod::Prod => x.prod_dim(0).squeeze::<2>(0),
            FusionMethod::Attention => match &self.attention {
                Some(score) => {
                    let weights = softmax(score.forward(x.clone()), 0).repeat_dim(2, features);
                    (x * weights).sum_dim(0).squeeze::<2>(0)
                }
                None => x.sum_dim(0).squeeze::<2>(0),
            },
            FusionMethod::Embrace => {
                let device = x.device();
                let mask = embrace_mask(modalities, batch, features, available, rng);
                let mask = Tensor::<B, 1>::from_floats(mask.as_slice(), &device).reshape([modalities, batch, features]);
                (x * mask).sum_dim(0).squeeze::<2>(0)
            }
        }
    }
}

/// One-hot `[modalities, batch, features]` selection mask
///
/// Each (sample, feature) keeps one modality drawn uniformly from the ones
/// available to that sample; a sample with none available draws from all.
fn embrace_mask<R: Rng + ?Sized>(
    modalities: usize,
    batch: usize,
    features: usize,
    available: Option<&[Vec<bool>]>,
    rng: &mut R,
) -> Vec<f32> {
    let mut mask = vec![0.0f32; modalities * batch * features];
    if modalities == 0 {
        return mask;
    }

    for b in 0..batch {
        let mut choices: Vec<usize> = match available.and_then(|a| a.get(b)) {
            Some(flags) => (0..modalities).filter(|&m| flags.get(m).copied().unwrap_or(false)).collect(),
            None => (0..modalities).collect(),
        };
        if choices.is_empty() {
            choices = (0..modalities).collect();
        }

        for f in 0..features {
            let m = choices[rng.gen_range(0..choices.len())];
            mask[(m * batch + b) * features + f] = 1.0;
        }
    }
    mask
}
