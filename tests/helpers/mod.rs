//! Shared setup for the HTTP-level tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use tempfile::TempDir;

use stegnox::app_state::AppState;
use stegnox::routes;
use stegnox::services::{
    dispatcher::Dispatcher,
    engine::ImageEngine,
    job_store::MemoryJobStore,
    lifecycle::JobController,
    queue::MemoryQueue,
    storage::LocalImageStore,
    worker::Worker,
};

pub const MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024;
const BOUNDARY: &str = "stegnox-test-boundary";

/// An in-memory deployment: memory store and queue, images in a temp dir.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let controller = Arc::new(JobController::new(Arc::new(MemoryJobStore::new())));
        let dispatcher = Arc::new(Dispatcher::new(controller, Arc::new(MemoryQueue::new())));
        let state = AppState::new(
            dispatcher,
            Arc::new(LocalImageStore::new(dir.path().join("images"))),
            Arc::new(ImageEngine::new()),
        );
        let router = routes::router(state.clone(), MAX_UPLOAD_BYTES);

        Self {
            state,
            router,
            _dir: dir,
        }
    }

    pub fn worker(&self, id: &str) -> Worker {
        Worker::new(
            id,
            self.state.dispatcher.clone(),
            self.state.images.clone(),
            self.state.engine.clone(),
            Duration::from_millis(10),
        )
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Router is infallible")
    }
}

/// A small RGB test image with non-uniform pixels.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 11 % 256) as u8, (y * 17 % 256) as u8, ((x ^ y) * 5 % 256) as u8])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .expect("Failed to encode test PNG");
    out
}

/// Builder for multipart/form-data request bodies.
#[derive(Default)]
pub struct MultipartBody {
    body: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
        self
    }

    pub fn into_request(mut self, uri: &str) -> Request<Body> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(self.body))
            .expect("Failed to build multipart request")
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("Failed to build request")
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::delete(uri).body(Body::empty()).expect("Failed to build request")
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("Response body is not JSON")
}
