use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{backend::Backend, Device, Tensor},
};

use super::conv_norm::{Conv2dNormActivation, Conv2dNormActivationConfig};

/// Linear 1x1 projection (no activation).
#[derive(Module, Debug)]
pub struct PointWiseLinear<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> PointWiseLinear<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }
}

/// Inverted residual block with a linear bottleneck.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    use_res_connect: bool,
    /// Pointwise expansion, absent when the expand ratio is 1.
    pw: Option<Conv2dNormActivation<B>>,
    dw: Conv2dNormActivation<B>,
    pw_linear: PointWiseLinear<B>,
}

impl<B: Backend> InvertedResidual<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = self.use_res_connect.then(|| x.clone());

        let out = match &self.pw {
            Some(pw) => pw.forward(x),
            None => x,
        };
        let out = self.dw.forward(out);
        let out = self.pw_linear.forward(out);

        match identity {
            Some(identity) => out + identity,
            None => out,
        }
    }
}

/// [InvertedResidual](InvertedResidual) configuration.
#[derive(Config, Debug)]
pub struct InvertedResidualConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub stride: usize,
    pub expand_ratio: usize,
}

impl InvertedResidualConfig {
    /// Initialize a new [InvertedResidual](InvertedResidual) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> InvertedResidual<B> {
        assert!(
            self.stride == 1 || self.stride == 2,
            "Inverted residual stride should be 1 or 2, got {}",
            self.stride
        );

        let hidden_dim = self.in_channels * self.expand_ratio;

        let pw = (self.expand_ratio != 1).then(|| {
            Conv2dNormActivationConfig::new(self.in_channels, hidden_dim)
                .with_kernel_size(1)
                .init(device)
        });

        // Depthwise 3x3
        let dw = Conv2dNormActivationConfig::new(hidden_dim, hidden_dim)
            .with_stride(self.stride)
            .with_groups(hidden_dim)
            .init(device);

        let pw_linear = PointWiseLinear {
            conv: Conv2dConfig::new([hidden_dim, self.out_channels], [1, 1])
                .with_padding(PaddingConfig2d::Explicit(0, 0))
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(self.out_channels).init(device),
        };

        InvertedResidual {
            use_res_connect: self.stride == 1 && self.in_channels == self.out_channels,
            pw,
            dw,
            pw_linear,
        }
    }
}
