use super::{pick_n_neurons, ModelError};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Dropout probability of every block
pub const BLOCK_DROPOUT: f64 = 0.5;

/// Fully connected stack configuration
#[derive(Config, Debug)]
pub struct FcConfig {
    pub in_features: usize,
    pub out_features: usize,
    pub n_layers: usize,

    /// Dropout before each linear layer
    #[config(default = "true")]
    pub dropout: bool,

    /// Batch norm after the last block; hidden blocks always have it
    #[config(default = "false")]
    pub batchnorm: bool,

    /// Multiplier of the first hidden width when `n_layers > 2`
    #[config(default = "4")]
    pub scaling_factor: usize,
}

impl FcConfig {
    /// `(in, out, batchnorm)` for each block
    pub fn layout(&self) -> Result<Vec<(usize, usize, bool)>, ModelError> {
        let (input, output) = (self.in_features, self.out_features);

        let layout = match self.n_layers {
            0 => return Err(ModelError::InvalidLayerCount),
            1 => vec![(input, output, self.batchnorm)],
            2 => {
                let hidden = pick_n_neurons(input).max(output);
                vec![(input, hidden, true), (hidden, output, self.batchnorm)]
            }
            n => {
                let mut hidden = pick_n_neurons(input) * self.scaling_factor;
                let mut blocks = vec![(input, hidden, true)];
                for _ in 0..n - 2 {
                    let next = pick_n_neurons(hidden).max(output);
                    blocks.push((hidden, next, true));
                    hidden = next;
                }
                blocks.push((hidden, output, self.batchnorm));
                blocks
            }
        };
        Ok(layout)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Fc<B>, ModelError> {
        let blocks: Vec<FcBlock<B>> = self
            .layout()?
            .into_iter()
            .map(|(d_in, d_out, batchnorm)| FcBlock {
                dropout: self.dropout.then(|| DropoutConfig::new(BLOCK_DROPOUT).init()),
                linear: LinearConfig::new(d_in, d_out).with_bias(true).init(device),
                norm: batchnorm.then(|| BatchNormConfig::new(d_out).init(device)),
            })
            .collect();

        Ok(Fc { blocks })
    }
}

/// Dropout, linear, relu, batch norm
#[derive(Module, Debug)]
pub struct FcBlock<B: Backend> {
    dropout: Option<Dropout>,
    linear: Linear<B>,
    norm: Option<BatchNorm<B, 1>>,
}

impl<B: Backend> FcBlock<B> {
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = match &self.dropout {
            Some(dropout) => dropout.forward(input),
            None => input,
        };
        let x = relu(self.linear.forward(x));
        match &self.norm {
            // BatchNorm<_, 1> expects [batch, channels, length]
            Some(norm) => norm.forward(x.unsqueeze_dim::<3>(2)).squeeze::<2>(2),
            None => x,
        }
    }
}

/// Fully connected model producing the final feature vector
#[derive(Module, Debug)]
pub struct Fc<B: Backend> {
    blocks: Vec<FcBlock<B>>,
}

impl<B: Backend> Fc<B> {
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.blocks.iter().fold(input, |x, block| block.forward(x))
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_layout_single_layer() {
        let layout = FcConfig::new(256, 64, 1).layout().unwrap();
        assert_eq!(layout, vec![(256, 64, false)]);
    }

    #[test]
    fn test_layout_two_layers() {
        let layout = FcConfig::new(300, 1000, 2).layout().unwrap();
        // pick_n_neurons(300) = 512 < out
        assert_eq!(layout, vec![(300, 1000, true), (1000, 1000, false)]);
    }

    #[test]
    fn test_layout_deep() {
        let layout = FcConfig::new(4000, 512, 5).with_scaling_factor(1).layout().unwrap();
        assert_eq!(
            layout,
            vec![
                (4000, 4096, true),
                (4096, 4096, true),
                (4096, 4096, true),
                (4096, 4096, true),
                (4096, 512, false),
            ]
        );

        let scaled = FcConfig::new(100, 10, 3).layout().unwrap();
        assert_eq!(scaled, vec![(100, 512, true), (512, 512, true), (512, 10, false)]);
    }

    #[test]
    fn test_zero_layers_rejected() {
        assert!(matches!(
            FcConfig::new(10, 10, 0).layout(),
            Err(ModelError::InvalidLayerCount)
        ));
    }

    #[test]
    fn test_forward_shape() {
        let device = <TestBackend as Backend>::Device::default();
        let fc = FcConfig::new(20, 8, 3)
            .with_batchnorm(true)
            .init::<TestBackend>(&device)
            .unwrap();
        assert_eq!(fc.n_blocks(), 3);

        let out = fc.forward(Tensor::<TestBackend, 2>::ones([4, 20], &device));
        assert_eq!(out.dims(), [4, 8]);
    }

    #[test]
    fn test_no_grad_freezes_parameters() {
        type Ad = Autodiff<TestBackend>;
        let device = <Ad as Backend>::Device::default();
        let fc = FcConfig::new(4, 2, 1).init::<Ad>(&device).unwrap();
        assert!(fc.blocks[0].linear.weight.is_require_grad());

        let frozen = fc.no_grad();
        assert!(!frozen.blocks[0].linear.weight.is_require_grad());
    }
}
