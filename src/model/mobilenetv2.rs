use core::cmp::max;

use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig,
    },
    tensor::{backend::Backend, Device, Tensor},
};

use super::{
    conv_norm::{Conv2dNormActivation, Conv2dNormActivationConfig},
    inverted_residual::{InvertedResidual, InvertedResidualConfig},
};

#[cfg(feature = "pretrained")]
use {
    super::weights::{self, WeightsMeta},
    burn::record::{FullPrecisionSettings, Recorder, RecorderError},
    burn_import::pytorch::{LoadArgs, PyTorchFileRecorder},
};

/// Inverted residual stages as (expand ratio, channels, repeats, first stride).
const STAGES: [[usize; 4]; 7] = [
    [1, 16, 1, 1],
    [6, 24, 2, 2],
    [6, 32, 3, 2],
    [6, 64, 4, 2],
    [6, 96, 3, 1],
    [6, 160, 3, 2],
    [6, 320, 1, 1],
];
const STEM_CHANNELS: usize = 32;
const HEAD_CHANNELS: usize = 1280;
/// Channel counts are rounded to a multiple of this number.
const ROUND_NEAREST: usize = 8;

/// Round `v` to the nearest multiple of `divisor`, never going below `divisor`
/// and never rounding down by more than 10%.
pub fn make_divisible(v: f32, divisor: usize) -> usize {
    let rounded = (v + divisor as f32 / 2.0) as usize / divisor * divisor;
    let rounded = max(rounded, divisor);

    if (rounded as f32) < 0.9 * v {
        rounded + divisor
    } else {
        rounded
    }
}

/// MobileNetV2 laid out like `torchvision.models.mobilenet_v2` so its checkpoints
/// map onto the module tree.
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    features: Vec<FeatureLayer<B>>,
    avg_pool: AdaptiveAvgPool2d,
    classifier: Classifier<B>,
}

#[allow(clippy::large_enum_variant)]
#[derive(Module, Debug)]
enum FeatureLayer<B: Backend> {
    InvertedResidual(InvertedResidual<B>),
    Conv(Conv2dNormActivation<B>),
}

impl<B: Backend> FeatureLayer<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::InvertedResidual(block) => block.forward(x),
            Self::Conv(conv) => conv.forward(x),
        }
    }
}

#[derive(Module, Debug)]
struct Classifier<B: Backend> {
    dropout: Dropout,
    linear: Linear<B>,
}

impl<B: Backend> Classifier<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(self.dropout.forward(x))
    }
}

impl<B: Backend> MobileNetV2<B> {
    /// Compute class logits for a `[batch_size, 3, height, width]` input.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .features
            .iter()
            .fold(input, |x, layer| layer.forward(x));
        let x = self.avg_pool.forward(x);
        // Reshape [B, C, 1, 1] -> [B, C]
        let x = x.flatten(1, 3);

        self.classifier.forward(x)
    }

    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        let [_d_input, d_output] = self.classifier.linear.weight.dims();
        d_output
    }

    /// MobileNetV2 from [`MobileNetV2: Inverted Residuals and Linear Bottlenecks`](https://arxiv.org/abs/1801.04381)
    /// with pre-trained weights.
    ///
    /// # Arguments
    ///
    /// * `weights`: Pre-trained weights to load.
    /// * `device` - Device to create the module on.
    ///
    /// # Returns
    ///
    /// A MobileNetV2 module with pre-trained weights.
    #[cfg(feature = "pretrained")]
    pub fn pretrained(
        weights: weights::MobileNetV2,
        device: &Device<B>,
    ) -> Result<Self, RecorderError> {
        let weights = weights.weights();
        let record = Self::load_weights_record(&weights, device)?;
        let model = MobileNetV2Config::new()
            .with_num_classes(weights.num_classes)
            .init(device)
            .load_record(record);

        Ok(model)
    }
}

#[cfg(feature = "pretrained")]
impl<B: Backend> MobileNetV2<B> {
    /// Load specified pre-trained PyTorch weights as a record.
    fn load_weights_record(
        weights: &weights::Weights,
        device: &Device<B>,
    ) -> Result<MobileNetV2Record<B>, RecorderError> {
        // Download torch weights
        let torch_weights = weights.download().map_err(|err| {
            RecorderError::Unknown(format!("Could not download weights.\nError: {err}"))
        })?;

        // Load weights from torch state_dict
        let load_args = LoadArgs::new(torch_weights)
            // Stem and head convs: features.{0,18}.{0,1}.* -> features.{0,18}.{conv,norm}.*
            .with_key_remap("features\\.(0|18)\\.0\\.(.+)", "features.$1.conv.$2")
            .with_key_remap("features\\.(0|18)\\.1\\.(.+)", "features.$1.norm.$2")
            // First block has no expansion: conv.0 is depthwise, conv.{1,2} project
            .with_key_remap("features\\.1\\.conv\\.0\\.0\\.(.+)", "features.1.dw.conv.$1")
            .with_key_remap("features\\.1\\.conv\\.0\\.1\\.(.+)", "features.1.dw.norm.$1")
            .with_key_remap("features\\.1\\.conv\\.1\\.(.+)", "features.1.pw_linear.conv.$1")
            .with_key_remap("features\\.1\\.conv\\.2\\.(.+)", "features.1.pw_linear.norm.$1")
            // Blocks 2..=17: conv.0 expands, conv.1 is depthwise, conv.{2,3} project
            .with_key_remap(
                "features\\.([2-9]|1[0-7])\\.conv\\.0\\.0\\.(.+)",
                "features.$1.pw.conv.$2",
            )
            .with_key_remap(
                "features\\.([2-9]|1[0-7])\\.conv\\.0\\.1\\.(.+)",
                "features.$1.pw.norm.$2",
            )
            .with_key_remap(
                "features\\.([2-9]|1[0-7])\\.conv\\.1\\.0\\.(.+)",
                "features.$1.dw.conv.$2",
            )
            .with_key_remap(
                "features\\.([2-9]|1[0-7])\\.conv\\.1\\.1\\.(.+)",
                "features.$1.dw.norm.$2",
            )
            .with_key_remap(
                "features\\.([2-9]|1[0-7])\\.conv\\.2\\.(.+)",
                "features.$1.pw_linear.conv.$2",
            )
            .with_key_remap(
                "features\\.([2-9]|1[0-7])\\.conv\\.3\\.(.+)",
                "features.$1.pw_linear.norm.$2",
            )
            // classifier.1.* -> classifier.linear.*
            .with_key_remap("classifier\\.1\\.(.+)", "classifier.linear.$1");
        let record = PyTorchFileRecorder::<FullPrecisionSettings>::new().load(load_args, device)?;

        Ok(record)
    }
}

/// [MobileNetV2](MobileNetV2) configuration.
#[derive(Config, Debug)]
pub struct MobileNetV2Config {
    #[config(default = "1000")]
    pub num_classes: usize,

    #[config(default = "1.0")]
    pub width_mult: f32,

    #[config(default = "0.2")]
    pub dropout: f64,
}

impl MobileNetV2Config {
    /// Initialize a new [MobileNetV2](MobileNetV2) module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> MobileNetV2<B> {
        let mut in_channels = make_divisible(STEM_CHANNELS as f32 * self.width_mult, ROUND_NEAREST);
        let head_channels = make_divisible(
            HEAD_CHANNELS as f32 * f32::max(1.0, self.width_mult),
            ROUND_NEAREST,
        );

        // 3x3 conv, /2
        let mut features = vec![FeatureLayer::Conv(
            Conv2dNormActivationConfig::new(3, in_channels)
                .with_stride(2)
                .init(device),
        )];

        for [expand_ratio, channels, repeats, stride] in STAGES {
            let out_channels = make_divisible(channels as f32 * self.width_mult, ROUND_NEAREST);
            for i in 0..repeats {
                let stride = if i == 0 { stride } else { 1 };
                features.push(FeatureLayer::InvertedResidual(
                    InvertedResidualConfig::new(in_channels, out_channels, stride, expand_ratio)
                        .init(device),
                ));
                in_channels = out_channels;
            }
        }

        // 1x1 conv to the classifier width
        features.push(FeatureLayer::Conv(
            Conv2dNormActivationConfig::new(in_channels, head_channels)
                .with_kernel_size(1)
                .init(device),
        ));

        MobileNetV2 {
            features,
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier: Classifier {
                dropout: DropoutConfig::new(self.dropout).init(),
                linear: LinearConfig::new(head_channels, self.num_classes).init(device),
            },
        }
    }
}
