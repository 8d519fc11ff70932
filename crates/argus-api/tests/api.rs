//! HTTP surface tests driven through the router with `tower::ServiceExt`.

use std::io::Cursor;
use std::path::Path;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use argus_api::{create_router, ApiConfig, AppState};

const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";

fn test_app(model_dir: &Path) -> Router {
    let config = ApiConfig {
        model_dir: model_dir.to_path_buf(),
        ..ApiConfig::default()
    };
    create_router(AppState::new(config), None)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Build a multipart body of (field name, optional filename, content) parts.
fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match filename {
            Some(f) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\r\n",
                    name, f
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn multipart_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn tiny_png() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(4, 4));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
    out.into_inner()
}

#[tokio::test]
async fn test_health_reports_ok_with_server_time() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["time"].as_f64().unwrap() > 1_600_000_000.0);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let response = app
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_weights_list_missing_dir_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir.path().join("does-not-exist"));

    let response = app
        .oneshot(Request::get("/weights").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["weights"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_weights_list_is_filtered_and_sorted() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.onnx"), b"weights").unwrap();
    std::fs::write(dir.path().join("a.pt"), b"weights").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"not weights").unwrap();

    let app = test_app(dir.path());
    let response = app
        .oneshot(Request::get("/weights").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let names: Vec<&str> = json["weights"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a.pt", "b.onnx"]);
}

#[tokio::test]
async fn test_weight_upload_rejects_unrecognized_extension() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let body = multipart_body(&[("file", Some("malware.exe"), b"bytes")]);
    let response = app
        .oneshot(multipart_request("/weights", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["detail"]
        .as_str()
        .unwrap()
        .contains("Unsupported weight format"));
}

#[tokio::test]
async fn test_weight_upload_stores_basename() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    // Path components in the client filename are stripped.
    let body = multipart_body(&[("file", Some("nested/dir/custom.onnx"), b"model bytes")]);
    let response = app
        .clone()
        .oneshot(multipart_request("/weights", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["saved"], "custom.onnx");
    assert!(dir.path().join("custom.onnx").exists());

    // The upload shows up in the listing.
    let response = app
        .oneshot(Request::get("/weights").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["weights"][0], "custom.onnx");
}

#[tokio::test]
async fn test_predict_without_file_field_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let body = multipart_body(&[("weights", None, b"yolov8n.onnx")]);
    let response = app
        .oneshot(multipart_request("/predict", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["detail"].as_str().unwrap().contains("Missing file"));
}

#[tokio::test]
async fn test_predict_rejects_undecodable_image() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let body = multipart_body(&[("file", Some("frame.jpg"), b"not an image at all")]);
    let response = app
        .oneshot(multipart_request("/predict", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["detail"]
        .as_str()
        .unwrap()
        .contains("Invalid image payload"));
}

#[tokio::test]
async fn test_predict_with_missing_model_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path());

    let png = tiny_png();
    let body = multipart_body(&[("file", Some("frame.png"), png.as_slice())]);
    let response = app
        .oneshot(multipart_request("/predict", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert!(json["detail"].as_str().unwrap().contains("Model not found"));
}
