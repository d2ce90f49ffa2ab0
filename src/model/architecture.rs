use super::fc::{Fc, FcConfig};
use super::ModelError;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Continuous clinical features (age at diagnosis)
pub const N_CONTINUOUS: usize = 1;

const CLINICAL_HIDDEN: usize = 256;
const EMBEDDING_DROPOUT: f64 = 0.5;

/// Look up one embedding per column and concatenate along features
fn embed_columns<B: Backend>(layers: &[Embedding<B>], x: Tensor<B, 2, Int>) -> Tensor<B, 2> {
    let [batch, _] = x.dims();
    let embedded = layers
        .iter()
        .enumerate()
        .map(|(i, layer)| {
            let column = x.clone().slice([0..batch, i..i + 1]);
            let out = layer.forward(column);
            let [_, _, dim] = out.dims();
            out.reshape([batch, dim])
        })
        .collect();
    Tensor::cat(embedded, 1)
}

fn check_width(what: &'static str, expected: usize, got: usize) -> Result<(), ModelError> {
    if expected == got {
        Ok(())
    } else {
        Err(ModelError::ShapeMismatch { what, expected, got })
    }
}

/// Clinical data configuration
#[derive(Config, Debug)]
pub struct ClinicalNetConfig {
    pub output_size: usize,

    /// `(categories, embedding dim)` per categorical column
    #[config(default = "vec![(32, 16), (2, 1), (9, 5), (3, 2), (3, 2), (3, 2), (16, 8), (10, 5), (21, 11)]")]
    pub embedding_dims: Vec<(usize, usize)>,
}

impl ClinicalNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ClinicalNet<B>, ModelError> {
        let embeddings = self
            .embedding_dims
            .iter()
            .map(|&(n, dim)| EmbeddingConfig::new(n, dim).init(device))
            .collect();
        let embedding_width: usize = self.embedding_dims.iter().map(|&(_, dim)| dim).sum();

        Ok(ClinicalNet {
            embeddings,
            embedding_dropout: DropoutConfig::new(EMBEDDING_DROPOUT).init(),
            continuous_norm: BatchNormConfig::new(N_CONTINUOUS).init(device),
            linear: LinearConfig::new(embedding_width + N_CONTINUOUS, CLINICAL_HIDDEN)
                .with_bias(true)
                .init(device),
            output: FcConfig::new(CLINICAL_HIDDEN, self.output_size, 1).init(device)?,
        })
    }
}

/// Clinical data extractor: embedded categories plus normalised age
#[derive(Module, Debug)]
pub struct ClinicalNet<B: Backend> {
    embeddings: Vec<Embedding<B>>,
    embedding_dropout: Dropout,
    continuous_norm: BatchNorm<B, 1>,
    linear: Linear<B>,
    output: Fc<B>,
}

impl<B: Backend> ClinicalNet<B> {
    pub fn n_categorical(&self) -> usize {
        self.embeddings.len()
    }

    /// `categorical` is `[batch, n_categorical]` category indices,
    /// `continuous` is `[batch, 1]`
    pub fn forward(&self, categorical: Tensor<B, 2, Int>, continuous: Tensor<B, 2>) -> Result<Tensor<B, 2>, ModelError> {
        check_width("categorical feature(s)", self.embeddings.len(), categorical.dims()[1])?;
        check_width("continuous feature(s)", N_CONTINUOUS, continuous.dims()[1])?;

        let x_cat = self.embedding_dropout.forward(embed_columns(&self.embeddings, categorical));
        let x_cont = self
            .continuous_norm
            .forward(continuous.unsqueeze_dim::<3>(2))
            .squeeze::<2>(2);

        let x = Tensor::cat(vec![x_cat, x_cont], 1);
        Ok(self.output.forward(self.linear.forward(x)))
    }
}

/// Gene copy number configuration
#[derive(Config, Debug)]
pub struct CnvNetConfig {
    pub output_size: usize,

    #[config(default = "2000")]
    pub n_genes: usize,

    /// Copy number states per gene (loss, neutral, gain)
    #[config(default = "3")]
    pub n_states: usize,

    #[config(default = "2")]
    pub embedding_dim: usize,
}

impl CnvNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<CnvNet<B>, ModelError> {
        let embeddings = (0..self.n_genes)
            .map(|_| EmbeddingConfig::new(self.n_states, self.embedding_dim).init(device))
            .collect();
        let fc = FcConfig::new(self.n_genes * self.embedding_dim, self.output_size, 5)
            .with_scaling_factor(1)
            .init(device)?;

        Ok(CnvNet { embeddings, fc })
    }
}

/// Gene copy number variation extractor
#[derive(Module, Debug)]
pub struct CnvNet<B: Backend> {
    embeddings: Vec<Embedding<B>>,
    fc: Fc<B>,
}

impl<B: Backend> CnvNet<B> {
    /// `x` is `[batch, n_genes]` copy number states
    pub fn forward(&self, x: Tensor<B, 2, Int>) -> Result<Tensor<B, 2>, ModelError> {
        check_width("gene(s)", self.embeddings.len(), x.dims()[1])?;
        Ok(self.fc.forward(embed_columns(&self.embeddings, x)))
    }
}

/// WSI patch feature extractor configuration
#[derive(Config, Debug)]
pub struct WsiNetConfig {
    pub output_size: usize,

    /// Stem width followed by one residual stage per entry
    #[config(default = "vec![32, 64, 128, 256]")]
    pub channels: Vec<usize>,

    /// Residual stages left trainable, counted from the last; the stem and
    /// earlier stages are frozen on init
    #[config(default = "2")]
    pub trainable_stages: usize,
}

impl WsiNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<WsiNet<B>, ModelError> {
        let (&stem_width, stages) = self
            .channels
            .split_first()
            .ok_or(ModelError::EmptyInput("channel widths"))?;

        let stem = Stem {
            conv: Conv2dConfig::new([3, stem_width], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(stem_width).init(device),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
        };

        let mut blocks = Vec::with_capacity(stages.len());
        let mut width = stem_width;
        for (i, &out) in stages.iter().enumerate() {
            let stride = if i == 0 { 1 } else { 2 };
            blocks.push(ResidualBlock::new(width, out, stride, device));
            width = out;
        }

        let model = WsiNet {
            stem,
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: FcConfig::new(width, self.output_size, 1).init(device)?,
            n_features: width,
        };
        Ok(model.freeze(self.trainable_stages))
    }
}

#[derive(Module, Debug)]
struct Stem<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    pool: MaxPool2d,
}

impl<B: Backend> Stem<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pool.forward(relu(self.norm.forward(self.conv.forward(x))))
    }
}

#[derive(Module, Debug)]
struct Projection<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

/// Two 3x3 convolutions with an identity or projected shortcut
#[derive(Module, Debug)]
struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    shortcut: Option<Projection<B>>,
}

impl<B: Backend> ResidualBlock<B> {
    fn new(d_in: usize, d_out: usize, stride: usize, device: &B::Device) -> Self {
        let conv3 = |c_in, s| {
            Conv2dConfig::new([c_in, d_out], [3, 3])
                .with_stride([s, s])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init::<B>(device)
        };

        let shortcut = (d_in != d_out || stride != 1).then(|| Projection {
            conv: Conv2dConfig::new([d_in, d_out], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(d_out).init(device),
        });

        Self {
            conv1: conv3(d_in, stride),
            norm1: BatchNormConfig::new(d_out).init(device),
            conv2: conv3(d_out, 1),
            norm2: BatchNormConfig::new(d_out).init(device),
            shortcut,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(p) => p.norm.forward(p.conv.forward(x.clone())),
            None => x.clone(),
        };
        let out = relu(self.norm1.forward(self.conv1.forward(x)));
        let out = self.norm2.forward(self.conv2.forward(out));
        relu(out + identity)
    }
}

/// WSI patch feature extractor and multi-view aggregator
#[derive(Module, Debug)]
pub struct WsiNet<B: Backend> {
    stem: Stem<B>,
    blocks: Vec<ResidualBlock<B>>,
    pool: AdaptiveAvgPool2d,
    fc: Fc<B>,
    n_features: usize,
}

impl<B: Backend> WsiNet<B> {
    /// Width of the pooled image features
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Pooled features `[batch, n_features]` of one view `[batch, 3, h, w]`
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stem.forward(x);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let [batch, channels, _, _] = x.dims();
        self.pool.forward(x).reshape([batch, channels])
    }

    /// Element-wise max of the view features, then the output layer
    pub fn forward(&self, views: Vec<Tensor<B, 4>>) -> Result<Tensor<B, 2>, ModelError> {
        if views.is_empty() {
            return Err(ModelError::EmptyInput("patch views"));
        }
        let pooled: Vec<Tensor<B, 2>> = views.into_iter().map(|v| self.features(v)).collect();
        let stacked: Tensor<B, 3> = Tensor::stack(pooled, 0);
        let patch_features = stacked.max_dim(0).squeeze::<2>(0);
        Ok(self.fc.forward(patch_features))
    }

    /// Stop gradients in the stem and in every residual stage before the
    /// last `trainable_stages`
    pub fn freeze(mut self, trainable_stages: usize) -> Self {
        self.stem = self.stem.no_grad();
        let first_trainable = self.blocks.len().saturating_sub(trainable_stages);
        self.blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| if i < first_trainable { block.no_grad() } else { block })
            .collect();
        self
    }
}
