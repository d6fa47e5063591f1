//! End-to-end regression against a real model.
//!
//! Runs only when `FIRESIGHT_TEST_MANIFEST` points at a model manifest URL.

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use firesight::config::{RuntimeKind, ServerSettings};
use firesight::inference::InPageBackend;
use firesight::model::{ModelCache, RemoteSource};
use firesight::results::ClassLabel;
use firesight::server::{AppState, router};
use firesight::service::PredictionPipeline;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

const BOUNDARY: &str = "firesight-regression";

fn black_png() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbImage::new(224, 224)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn multipart_body(image: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"black.png\"\r\nContent-Type: image/png\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(image);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn test_all_black_image_is_not_fire() {
    let Ok(manifest_url) = std::env::var("FIRESIGHT_TEST_MANIFEST") else {
        eprintln!("FIRESIGHT_TEST_MANIFEST not set, skipping");
        return;
    };

    let client = firesight::model::fetch::http_client(Duration::from_secs(120)).unwrap();
    let cache = ModelCache::new(
        Arc::new(RemoteSource::new(manifest_url, client)),
        Arc::new(InPageBackend::new()),
    );
    let pipeline = PredictionPipeline::new(Arc::new(cache));
    let app = router(AppState::new(
        pipeline,
        None,
        &ServerSettings::default(),
        RuntimeKind::InPage,
    ));

    let request = Request::post("/predict")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(&black_png())))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 4);

    let total: f64 = results
        .iter()
        .map(|r| r["probability"].as_f64().unwrap())
        .sum();
    assert!((total - 1.0).abs() < 1e-3, "probabilities sum to {total}");

    let top: ClassLabel = serde_json::from_value(results[0]["className"].clone()).unwrap();
    assert_ne!(top, ClassLabel::Fire, "black image classified as {top}");
    assert_ne!(top, ClassLabel::SmokeFire, "black image classified as {top}");
}
