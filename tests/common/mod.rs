//! Test utilities for the HTTP surface.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use image::{DynamicImage, ImageFormat, RgbImage};
use inkframe::config::Config;
use inkframe::db::Database;
use inkframe::display::MockSink;
use inkframe::library::PhotoLibrary;
use inkframe::server::{create_router, AppState};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "inkframe-test-boundary";

/// A router over a scratch data directory with a mock panel.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub library: Arc<PhotoLibrary>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };
        adjust(&mut config);

        let db = Database::open(&config.db_path()).expect("Failed to open database");
        db.initialize().expect("Failed to initialize database");
        let library = Arc::new(
            PhotoLibrary::new(Arc::new(db), Box::new(MockSink::new()), &config)
                .expect("Failed to create library"),
        );

        let state = AppState::new(library.clone(), Arc::new(config));
        Self {
            router: create_router(state),
            library,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request and return status plus the raw body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    /// Send a bodiless request and parse the JSON reply.
    pub async fn json(&self, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, parse_json(&body))
    }

    /// Upload `bytes` as the `file` field of a multipart form.
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> (StatusCode, serde_json::Value) {
        self.upload_field("file", filename, bytes).await
    }

    pub async fn upload_field(
        &self,
        field: &str,
        filename: &str,
        bytes: &[u8],
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(field, filename, bytes)))
            .unwrap();
        let (status, body) = self.send(request).await;
        (status, parse_json(&body))
    }
}

fn parse_json(body: &[u8]) -> serde_json::Value {
    if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(body).unwrap_or(serde_json::Value::Null)
    }
}

/// One-part multipart/form-data body.
pub fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// A small JPEG with some structure for the ditherer to chew on.
#[allow(dead_code)]
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 5 % 256) as u8, (y * 9 % 256) as u8, 140])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .unwrap();
    bytes
}
