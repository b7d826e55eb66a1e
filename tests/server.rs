//! Router tests against a randomly initialized MobileNetV2, no weights download needed.

use std::io::Cursor;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use burn::backend::NdArray;
use http_body_util::BodyExt;
use image::{ImageOutputFormat, Rgb, RgbImage};
use serde_json::Value;
use tower::ServiceExt;

use mobilenetv2_classifier::{
    model::mobilenetv2::MobileNetV2Config,
    server::{router, AppState},
    ImageClassifier,
};

type B = NdArray<f32>;

const BOUNDARY: &str = "classifier-test-boundary";

fn app_with_limit(body_limit: usize) -> Router {
    let device = Default::default();
    let model = MobileNetV2Config::new().init::<B>(&device);
    router(AppState::new(ImageClassifier::new(model, &device)), body_limit)
}

fn app() -> Router {
    app_with_limit(1024 * 1024)
}

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_fn(40, 30, |x, y| Rgb([(x * 6) as u8, (y * 8) as u8, 128]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

/// Build a multipart/form-data POST to `/predict` with a single field.
fn upload(field: &str, file_name: Option<&str>, content: &[u8]) -> Request<Body> {
    let disposition = match file_name {
        Some(name) => format!("form-data; name=\"{field}\"; filename=\"{name}\""),
        None => format!("form-data; name=\"{field}\""),
    };

    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Disposition: {disposition}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_healthy() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "healthy");
}

#[tokio::test]
async fn index_serves_upload_page() {
    let response = app()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/html"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let page = std::str::from_utf8(&body).unwrap();
    assert!(page.contains("fetch('/predict'"));
    assert!(page.contains("form.append('file', file)"));
}

#[tokio::test]
async fn predict_returns_top_five() {
    let response = app()
        .oneshot(upload("file", Some("photo.png"), &png_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 5);

    let mut previous = f32::INFINITY;
    for prediction in predictions {
        assert!(!prediction["label"].as_str().unwrap().is_empty());
        let confidence = prediction["confidence"].as_str().unwrap();
        let value: f32 = confidence.strip_suffix('%').unwrap().parse().unwrap();
        assert!(value <= previous);
        previous = value;
    }
}

#[tokio::test]
async fn predict_without_file_field_is_bad_request() {
    let response = app()
        .oneshot(upload("image", Some("photo.png"), &png_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No file uploaded");
}

#[tokio::test]
async fn predict_without_multipart_body_is_bad_request() {
    let empty = Request::post("/predict").body(Body::empty()).unwrap();
    let form = Request::post("/predict")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("a=b"))
        .unwrap();

    for request in [empty, form] {
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "No file uploaded");
    }
}

#[tokio::test]
async fn predict_with_file_field_without_filename_is_bad_request() {
    let response = app()
        .oneshot(upload("file", None, b"plain form value"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No file uploaded");
}

#[tokio::test]
async fn predict_with_empty_filename_is_bad_request() {
    let response = app().oneshot(upload("file", Some(""), b"")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No file selected");
}

#[tokio::test]
async fn predict_with_undecodable_image_is_server_error() {
    let response = app()
        .oneshot(upload("file", Some("notes.txt"), b"just some text"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = json_body(response).await["error"].as_str().unwrap().to_string();
    assert!(error.starts_with("Could not decode image"), "{error}");
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let response = app_with_limit(1024)
        .oneshot(upload("file", Some("big.png"), &vec![0u8; 64 * 1024]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let request = Request::get("/health")
        .header(header::ORIGIN, "https://example.com")
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();

    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}
