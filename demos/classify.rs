use burn::backend::NdArray;
use mobilenetv2_classifier::ImageClassifier;

pub fn main() {
    // Parse arguments
    let img_path = std::env::args().nth(1).expect("No image path provided");

    let device = Default::default();
    let classifier: ImageClassifier<NdArray> = ImageClassifier::pretrained(&device)
        .map_err(|err| format!("Failed to load pre-trained weights.\nError: {err}"))
        .unwrap();

    let bytes = std::fs::read(&img_path)
        .map_err(|err| format!("Failed to read image {img_path}.\nError: {err}"))
        .unwrap();

    let predictions = classifier
        .classify(&bytes)
        .map_err(|err| format!("Failed to classify image {img_path}.\nError: {err}"))
        .unwrap();

    for (rank, prediction) in predictions.iter().enumerate() {
        println!(
            "{}. {} ({})",
            rank + 1,
            prediction.label,
            prediction.confidence
        );
    }
}
