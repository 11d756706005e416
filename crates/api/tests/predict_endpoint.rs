//! End-to-end tests against a server bound to an ephemeral port

use api::{build_state, create_router, run_server, serve, AppState, ServerError, Settings};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use inference_engine::{
    ClassToken, InferenceBackend, InferenceError, LoadError, OutputKind, PixelOp, Predictor,
    Preprocessor, ResizeMethod,
};
use ndarray::{Array4, Axis};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Calls warm, red-dominant photos cats
struct WarmIsCat;

impl InferenceBackend for WarmIsCat {
    fn forward(&self, input: Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let red = input.index_axis(Axis(1), 0).mean().unwrap_or(0.0);
        let blue = input.index_axis(Axis(1), 2).mean().unwrap_or(0.0);
        let d = (red - blue) * 5.0;
        Ok(vec![-d, d])
    }

    fn name(&self) -> &str {
        "warm-is-cat"
    }
}

/// Backend with the wrong output arity
struct ThreeClasses;

impl InferenceBackend for ThreeClasses {
    fn forward(&self, _input: Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        Ok(vec![0.2, 0.3, 0.5])
    }

    fn name(&self) -> &str {
        "three-classes"
    }
}

fn predictor<B: InferenceBackend + 'static>(backend: B) -> Predictor {
    let pre = Preprocessor::new(32, 32, ResizeMethod::Squish).with_op(PixelOp::Scale(255.0));
    Predictor::new(
        pre,
        [ClassToken::from(false), ClassToken::from(true)],
        OutputKind::Logits,
        backend,
    )
}

async fn spawn(predictor: Predictor, settings: Settings) -> String {
    let app = create_router(Arc::new(AppState::new(predictor)), &settings).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, app));
    format!("http://{}", addr)
}

fn photo(rgb: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_fn(64, 48, |x, y| {
        let jitter = ((x + y) % 8) as u8;
        Rgb([rgb[0].saturating_sub(jitter), rgb[1], rgb[2].saturating_add(jitter)])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}

async fn upload(base: &str, bytes: Vec<u8>, file_name: &str, mime: &str) -> (StatusCode, Value) {
    let part = Part::bytes(bytes).file_name(file_name.to_string()).mime_str(mime).unwrap();
    let form = Form::new().part("image", part);
    let response = reqwest::Client::new()
        .post(format!("{}/predict", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_cat_photo_is_classified() {
    let base = spawn(predictor(WarmIsCat), Settings::default()).await;

    let (status, body) = upload(&base, photo([230, 120, 20], ImageFormat::Jpeg), "cat.jpg", "image/jpeg").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], "Cat");
    let probability = body["probability"].as_str().unwrap();
    assert!(probability.starts_with("0.9"), "probability {}", probability);
    assert_eq!(probability.len(), 6);
}

#[tokio::test]
async fn test_dog_photo_is_classified() {
    let base = spawn(predictor(WarmIsCat), Settings::default()).await;

    let (status, body) = upload(&base, photo([20, 90, 210], ImageFormat::Png), "dog.png", "image/png").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], "Dog");
    let p: f64 = body["probability"].as_str().unwrap().parse().unwrap();
    assert!((0.0..=1.0).contains(&p));
}

#[tokio::test]
async fn test_empty_upload_is_bad_request() {
    let base = spawn(predictor(WarmIsCat), Settings::default()).await;

    let (status, body) = upload(&base, Vec::new(), "empty.png", "image/png").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("Invalid image data"));
}

#[tokio::test]
async fn test_spoofed_text_upload_is_bad_request() {
    let base = spawn(predictor(WarmIsCat), Settings::default()).await;

    let text = b"Dear diary, today I saw a cat.".to_vec();
    let (status, body) = upload(&base, text, "notes.jpg", "image/jpeg").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("Invalid image data"));
}

#[tokio::test]
async fn test_non_image_content_type_is_bad_request() {
    let base = spawn(predictor(WarmIsCat), Settings::default()).await;

    let (status, body) = upload(&base, photo([1, 2, 3], ImageFormat::Png), "x.txt", "text/plain").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("not an image"));
}

#[tokio::test]
async fn test_missing_image_field() {
    let base = spawn(predictor(WarmIsCat), Settings::default()).await;

    let form = Form::new().text("comment", "forgot the file");
    let response = reqwest::Client::new()
        .post(format!("{}/predict", base))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_non_multipart_body_is_json_bad_request() {
    let base = spawn(predictor(WarmIsCat), Settings::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/predict", base))
        .json(&serde_json::json!({ "image": "aGVsbG8=" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("application/json"), "content type {}", content_type);
    let body: Value = response.json().await.unwrap();
    assert!(!body["detail"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_inference_failure_is_internal_error() {
    let base = spawn(predictor(ThreeClasses), Settings::default()).await;

    let (status, body) = upload(&base, photo([200, 0, 0], ImageFormat::Png), "cat.png", "image/png").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "Internal server error");
}

#[tokio::test]
async fn test_oversize_upload_is_rejected() {
    let mut settings = Settings::default();
    settings.server.max_upload_bytes = 1024;
    let base = spawn(predictor(WarmIsCat), settings).await;

    let (status, _) = upload(&base, vec![0u8; 4096], "big.png", "image/png").await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_rate_limit() {
    let mut settings = Settings::default();
    settings.rate_limit.enabled = true;
    settings.rate_limit.per_second = 60;
    settings.rate_limit.burst_size = 2;
    let base = spawn(predictor(WarmIsCat), settings).await;

    let bytes = photo([230, 120, 20], ImageFormat::Png);
    for _ in 0..2 {
        let (status, _) = upload(&base, bytes.clone(), "cat.png", "image/png").await;
        assert_eq!(status, StatusCode::OK);
    }

    let part = Part::bytes(bytes).file_name("cat.png").mime_str("image/png").unwrap();
    let response = reqwest::Client::new()
        .post(format!("{}/predict", base))
        .multipart(Form::new().part("image", part))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_informational_endpoints() {
    let base = spawn(predictor(WarmIsCat), Settings::default()).await;
    let client = reqwest::Client::new();

    let root: Value = client.get(format!("{}/", base)).send().await.unwrap().json().await.unwrap();
    assert!(root["message"].as_str().unwrap().contains("/predict"));

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["model"]["vocab"], serde_json::json!(["False", "True"]));
    assert_eq!(health["model"]["backend"], "warm-is-cat");

    let ui = client.get(format!("{}/ui", base)).send().await.unwrap();
    assert_eq!(ui.status(), StatusCode::OK);
    assert!(ui.text().await.unwrap().contains("/predict"));

    let metrics = client.get(format!("{}/metrics", base)).send().await.unwrap();
    assert_eq!(metrics.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cors_preflight() {
    let mut settings = Settings::default();
    settings.server.cors_allow_origins = vec!["http://localhost:3000".to_string()];
    let base = spawn(predictor(WarmIsCat), settings).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("{}/predict", base))
        .header("Origin", "http://localhost:3000")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();

    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );
}

#[tokio::test]
async fn test_missing_artifact_prevents_startup() {
    let mut settings = Settings::default();
    settings.model.path = "/nonexistent/pet-classifier/model.pcla".to_string();
    settings.server.host = "127.0.0.1".to_string();
    settings.server.port = 0;

    assert!(matches!(
        build_state(&settings),
        Err(ServerError::Load(LoadError::ArtifactNotFound { .. }))
    ));
    assert!(matches!(
        run_server(settings).await,
        Err(ServerError::Load(LoadError::ArtifactNotFound { .. }))
    ));
}
