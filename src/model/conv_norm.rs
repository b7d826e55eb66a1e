use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{activation::relu, backend::Backend, Device, Tensor},
};

/// Clamp activations to `[0, 6]`.
pub fn relu6<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    relu(x).clamp_max(6)
}

/// A Conv2d -> BatchNorm -> ReLU6 block.
#[derive(Module, Debug)]
pub struct Conv2dNormActivation<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> Conv2dNormActivation<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        relu6(x)
    }
}

/// [Conv2dNormActivation](Conv2dNormActivation) configuration.
#[derive(Config, Debug)]
pub struct Conv2dNormActivationConfig {
    pub in_channels: usize,
    pub out_channels: usize,

    #[config(default = "3")]
    pub kernel_size: usize,

    #[config(default = "1")]
    pub stride: usize,

    #[config(default = "1")]
    pub groups: usize,
}

impl Conv2dNormActivationConfig {
    /// Initialize a new [Conv2dNormActivation](Conv2dNormActivation) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Conv2dNormActivation<B> {
        // Same padding
        let pad = (self.kernel_size - 1) / 2;

        let conv = Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([self.stride, self.stride])
        .with_padding(PaddingConfig2d::Explicit(pad, pad))
        .with_groups(self.groups)
        .with_bias(false)
        .init(device);

        Conv2dNormActivation {
            conv,
            norm: BatchNormConfig::new(self.out_channels).init(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn relu6_clamps_both_ends() {
        let device = Default::default();
        let x = Tensor::<B, 1>::from_floats([-3.0, 0.5, 6.0, 42.0], &device);

        let out = relu6(x).into_data().to_vec::<f32>().unwrap();

        assert_eq!(out, vec![0.0, 0.5, 6.0, 6.0]);
    }

    #[test]
    fn stride_two_halves_spatial_dims() {
        let device = Default::default();
        let block = Conv2dNormActivationConfig::new(3, 8)
            .with_stride(2)
            .init::<B>(&device);

        let out = block.forward(Tensor::zeros([1, 3, 16, 16], &device));

        assert_eq!(out.dims(), [1, 8, 8, 8]);
    }
}
