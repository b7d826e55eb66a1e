use std::time::Instant;

use burn::tensor::{activation::softmax, backend::Backend, Device, Element, Tensor, TensorData};
use image::{imageops, imageops::FilterType, RgbImage};
use serde::Serialize;

use crate::{
    error::{ClassifierError, Result},
    model::{
        imagenet::{self, Normalizer},
        mobilenetv2::MobileNetV2,
    },
};

#[cfg(feature = "pretrained")]
use {crate::model::weights, burn::record::RecorderError};

pub const HEIGHT: usize = 224;
pub const WIDTH: usize = 224;
/// Number of predictions returned per image unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 5;

/// A single ranked class prediction, ready to be sent to the browser.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: String,
}

impl Prediction {
    fn new(class_index: usize, probability: f32) -> Self {
        Self {
            label: imagenet::display_label(imagenet::CLASSES[class_index]),
            confidence: format_confidence(probability),
        }
    }
}

/// Format a probability in `[0, 1]` as a percentage with two decimals.
pub fn format_confidence(probability: f32) -> String {
    format!("{:.2}%", probability * 100.0)
}

/// Indices and values of the `k` largest entries, highest first.
///
/// Ties keep the lower index first.
pub fn top_k(probs: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);
    ranked
}

/// Decode an uploaded image (any supported format) and resize it to the model input size.
pub fn load_image(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.is_empty() {
        return Err(ClassifierError::EmptyImage);
    }

    // Drop alpha and expand grayscale before resampling
    let img = image::load_from_memory(bytes)?.into_rgb8();

    Ok(imageops::resize(
        &img,
        WIDTH as u32,
        HEIGHT as u32,
        FilterType::Triangle, // also known as bilinear in 2D
    ))
}

fn to_tensor<B: Backend, T: Element>(
    data: Vec<T>,
    shape: [usize; 3],
    device: &Device<B>,
) -> Tensor<B, 3> {
    Tensor::<B, 3>::from_data(
        TensorData::new(data, shape).convert::<B::FloatElem>(),
        device,
    )
    // [H, W, C] -> [C, H, W]
    .permute([2, 0, 1])
        / 255 // normalize between [0, 1]
}

/// MobileNetV2 wrapped with the preprocessing and decoding around a forward pass.
pub struct ImageClassifier<B: Backend> {
    model: MobileNetV2<B>,
    normalizer: Normalizer<B>,
    device: Device<B>,
    top_k: usize,
}

impl<B: Backend> ImageClassifier<B> {
    pub fn new(model: MobileNetV2<B>, device: &Device<B>) -> Self {
        Self {
            model,
            normalizer: Normalizer::new(device),
            device: device.clone(),
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Classifier backed by the torchvision ImageNet weights.
    #[cfg(feature = "pretrained")]
    pub fn pretrained(device: &Device<B>) -> std::result::Result<Self, RecorderError> {
        let model = MobileNetV2::pretrained(weights::MobileNetV2::ImageNet1kV2, device)?;
        Ok(Self::new(model, device))
    }

    /// Number of predictions returned by [classify](Self::classify).
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Turn raw image bytes into a normalized `[1, 3, HEIGHT, WIDTH]` input.
    pub fn preprocess(&self, bytes: &[u8]) -> Result<Tensor<B, 4>> {
        let img = load_image(bytes)?;
        let x = to_tensor(img.into_raw(), [HEIGHT, WIDTH, 3], &self.device).unsqueeze::<4>(); // [B, C, H, W]

        Ok(self.normalizer.normalize(x))
    }

    /// Class probabilities for a single preprocessed image.
    pub fn probabilities(&self, input: Tensor<B, 4>) -> Result<Vec<f32>> {
        let start = Instant::now();
        let logits = self.model.forward(input);

        let [batch_size, num_classes] = logits.dims();
        if batch_size != 1 {
            return Err(ClassifierError::Output(format!(
                "expected a single image, got a batch of {batch_size}"
            )));
        }
        if num_classes != imagenet::CLASSES.len() {
            return Err(ClassifierError::Output(format!(
                "model has {num_classes} classes, label set has {}",
                imagenet::CLASSES.len()
            )));
        }

        let probs = softmax(logits, 1)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|err| ClassifierError::Output(format!("{err:?}")))?;

        tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Forward pass");

        Ok(probs)
    }

    /// Top predictions for an uploaded image, highest confidence first.
    pub fn classify(&self, bytes: &[u8]) -> Result<Vec<Prediction>> {
        let input = self.preprocess(bytes)?;
        let probs = self.probabilities(input)?;

        Ok(top_k(&probs, self.top_k)
            .into_iter()
            .map(|(idx, prob)| Prediction::new(idx, prob))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mobilenetv2::MobileNetV2Config;
    use burn::backend::NdArray;
    use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Luma, Rgb, Rgba};
    use std::io::Cursor;

    type B = NdArray<f32>;

    fn encode(img: DynamicImage, format: ImageOutputFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        encode(DynamicImage::ImageRgb8(img), ImageOutputFormat::Png)
    }

    fn assert_uniform(img: &RgbImage, expected: [u8; 3], tolerance: u8) {
        assert_eq!(img.dimensions(), (WIDTH as u32, HEIGHT as u32));
        let (w, h) = (WIDTH as u32, HEIGHT as u32);
        for (x, y) in [(0, 0), (w / 2, h / 2), (w - 1, h - 1)] {
            let Rgb(actual) = *img.get_pixel(x, y);
            for (a, e) in actual.iter().zip(expected) {
                assert!(
                    a.abs_diff(e) <= tolerance,
                    "pixel ({x}, {y}): {actual:?} != {expected:?}"
                );
            }
        }
    }

    #[test]
    fn top_k_ranks_highest_first() {
        let probs = [0.1, 0.4, 0.05, 0.3, 0.15];

        let ranked = top_k(&probs, 3);

        assert_eq!(ranked, vec![(1, 0.4), (3, 0.3), (4, 0.15)]);
    }

    #[test]
    fn top_k_keeps_lower_index_on_ties_and_caps_at_len() {
        let probs = [0.25, 0.5, 0.25];

        let ranked = top_k(&probs, 10);

        assert_eq!(ranked, vec![(1, 0.5), (0, 0.25), (2, 0.25)]);
    }

    #[test]
    fn confidence_is_a_two_decimal_percentage() {
        assert_eq!(format_confidence(0.871_34), "87.13%");
        assert_eq!(format_confidence(1.0), "100.00%");
        assert_eq!(format_confidence(0.0), "0.00%");
    }

    #[test]
    fn prediction_uses_display_label() {
        let pred = Prediction::new(207, 0.5);
        assert_eq!(pred.label, "Golden Retriever");
        assert_eq!(pred.confidence, "50.00%");
    }

    #[test]
    fn load_image_resizes_any_input() {
        let img = load_image(&png_bytes(37, 500, [10, 20, 30])).unwrap();

        assert_eq!(img.dimensions(), (WIDTH as u32, HEIGHT as u32));
        assert_eq!(img.get_pixel(100, 100), &Rgb([10, 20, 30]));
    }

    #[test]
    fn load_image_drops_alpha_channel() {
        let img = ImageBuffer::from_pixel(20, 10, Rgba([10u8, 20, 30, 128]));
        let bytes = encode(DynamicImage::ImageRgba8(img), ImageOutputFormat::Png);

        assert_uniform(&load_image(&bytes).unwrap(), [10, 20, 30], 0);
    }

    #[test]
    fn load_image_expands_grayscale() {
        let img = ImageBuffer::from_pixel(16, 16, Luma([77u8]));
        let bytes = encode(DynamicImage::ImageLuma8(img), ImageOutputFormat::Png);

        assert_uniform(&load_image(&bytes).unwrap(), [77, 77, 77], 0);
    }

    #[test]
    fn load_image_reduces_sixteen_bit_depth() {
        let img = ImageBuffer::from_pixel(12, 12, Rgb([200u16 * 257, 100 * 257, 50 * 257]));
        let bytes = encode(DynamicImage::ImageRgb16(img), ImageOutputFormat::Png);

        assert_uniform(&load_image(&bytes).unwrap(), [200, 100, 50], 0);
    }

    #[test]
    fn load_image_decodes_jpeg_and_bmp() {
        let img = || DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 24, Rgb([180, 90, 40])));

        let jpeg = encode(img(), ImageOutputFormat::Jpeg(95));
        assert_uniform(&load_image(&jpeg).unwrap(), [180, 90, 40], 4);

        let bmp = encode(img(), ImageOutputFormat::Bmp);
        assert_uniform(&load_image(&bmp).unwrap(), [180, 90, 40], 0);
    }

    #[test]
    fn load_image_rejects_garbage() {
        assert!(matches!(load_image(&[]), Err(ClassifierError::EmptyImage)));
        assert!(matches!(
            load_image(b"definitely not an image"),
            Err(ClassifierError::Decode(_))
        ));
    }

    #[test]
    fn preprocess_normalizes_with_imagenet_statistics() {
        let device = Default::default();
        let model = MobileNetV2Config::new().with_num_classes(10).init::<B>(&device);
        let classifier = ImageClassifier::new(model, &device);

        let x = classifier.preprocess(&png_bytes(8, 8, [255, 0, 0])).unwrap();
        assert_eq!(x.dims(), [1, 3, HEIGHT, WIDTH]);

        // First pixel of each channel
        let values = x.into_data().to_vec::<f32>().unwrap();
        let plane = HEIGHT * WIDTH;
        let expected = [
            (1.0 - 0.485) / 0.229,
            (0.0 - 0.456) / 0.224,
            (0.0 - 0.406) / 0.225,
        ];
        for (channel, expected) in expected.iter().enumerate() {
            let actual = values[channel * plane];
            assert!((actual - expected).abs() < 1e-4, "{actual} != {expected}");
        }
    }

    #[test]
    fn classify_rejects_mismatched_label_set() {
        let device = Default::default();
        let model = MobileNetV2Config::new().with_num_classes(10).init::<B>(&device);
        let classifier = ImageClassifier::new(model, &device);

        let err = classifier
            .classify(&png_bytes(32, 32, [0, 128, 255]))
            .unwrap_err();

        assert!(matches!(err, ClassifierError::Output(_)));
    }

    #[test]
    fn classify_returns_top_k_sorted_predictions() {
        let device = Default::default();
        let model = MobileNetV2Config::new().init::<B>(&device);
        let classifier = ImageClassifier::new(model, &device).with_top_k(3);

        let predictions = classifier
            .classify(&png_bytes(64, 48, [200, 180, 40]))
            .unwrap();

        assert_eq!(predictions.len(), 3);
        let confidences: Vec<f32> = predictions
            .iter()
            .map(|p| p.confidence.trim_end_matches('%').parse().unwrap())
            .collect();
        assert!(confidences.windows(2).all(|w| w[0] >= w[1]));
    }
}
