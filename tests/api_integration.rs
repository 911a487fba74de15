#![cfg(feature = "server")]

//! End-to-end tests of the HTTP surface with a stub renderer (no Chrome needed)

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use htmlsnap::config::{RenderStrategy, ServiceConfig};
use htmlsnap::pool::{PoolWorker, RenderPool};
use htmlsnap::server::{router, AppState};
use htmlsnap::{ConversionRequest, Error, RenderSettings, RenderedImage, Renderer, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

enum Outcome {
    Image,
    Fail,
    Hang(Duration),
}

struct StubRenderer {
    calls: AtomicUsize,
    outcome: Outcome,
}

impl StubRenderer {
    fn new(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Renderer for StubRenderer {
    fn render(&self, request: &ConversionRequest) -> Result<RenderedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            Outcome::Image => {
                let mut bytes = PNG_MAGIC.to_vec();
                bytes.extend_from_slice(request.markup().as_bytes());
                Ok(RenderedImage::new(bytes, request.format()))
            }
            Outcome::Fail => Err(Error::LoadError("Setting content failed: net::ERR_ABORTED".into())),
            Outcome::Hang(d) => {
                std::thread::sleep(d);
                Ok(RenderedImage::new(PNG_MAGIC.to_vec(), request.format()))
            }
        }
    }
}

fn app(renderer: Arc<StubRenderer>, config: ServiceConfig) -> Router {
    router(AppState::new(renderer, config))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let resp = app.oneshot(request).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

async fn post_convert(app: Router, body: &str) -> (StatusCode, HeaderMap, Bytes) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/convert")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

fn error_message(body: &Bytes) -> String {
    let json: serde_json::Value = serde_json::from_slice(body).expect("error body is JSON");
    json["error"].as_str().expect("error field is a string").to_string()
}

#[tokio::test]
async fn converts_red_div_to_png() {
    let renderer = StubRenderer::new(Outcome::Image);
    let body = serde_json::json!({
        "html": "<div style=\"width:100%;height:100%;background:red\"></div>",
        "format": "png",
    });
    let (status, headers, bytes) = post_convert(app(renderer.clone(), ServiceConfig::default()), &body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"converted-image.png\""
    );
    assert!(bytes.starts_with(PNG_MAGIC));
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn converts_to_jpeg() {
    let renderer = StubRenderer::new(Outcome::Image);
    let (status, headers, bytes) = post_convert(
        app(renderer, ServiceConfig::default()),
        r#"{"html": "<h1>Launch day</h1>", "format": "jpg"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"converted-image.jpg\""
    );
    assert!(!bytes.is_empty());
}

#[tokio::test]
async fn empty_markup_is_rejected_without_rendering() {
    for html in ["\"\"", "\"   \\n\\t \"", "null"] {
        let renderer = StubRenderer::new(Outcome::Image);
        let body = format!(r#"{{"html": {}, "format": "png"}}"#, html);
        let (status, headers, bytes) = post_convert(app(renderer.clone(), ServiceConfig::default()), &body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "html = {}", html);
        assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("application/json"));
        assert_eq!(error_message(&bytes), "HTML code is required");
        assert_eq!(renderer.calls(), 0);
    }
}

#[tokio::test]
async fn unsupported_format_is_rejected() {
    for format in ["\"gif\"", "\"jpeg\"", "\"PNG\"", "7"] {
        let renderer = StubRenderer::new(Outcome::Image);
        let body = format!(r#"{{"html": "<p>hello</p>", "format": {}}}"#, format);
        let (status, _, bytes) = post_convert(app(renderer.clone(), ServiceConfig::default()), &body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "format = {}", format);
        assert_eq!(error_message(&bytes), "Format must be 'png' or 'jpg'");
        assert_eq!(renderer.calls(), 0);
    }
}

#[tokio::test]
async fn missing_fields_are_rejected() {
    let renderer = StubRenderer::new(Outcome::Image);
    let (status, _, bytes) = post_convert(app(renderer.clone(), ServiceConfig::default()), r#"{"format": "png"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&bytes), "HTML code is required");

    let (status, _, _) = post_convert(app(renderer.clone(), ServiceConfig::default()), r#"{"html": "<p>x</p>"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() {
    let renderer = StubRenderer::new(Outcome::Image);
    let (status, _, bytes) = post_convert(app(renderer.clone(), ServiceConfig::default()), "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&bytes), "Invalid JSON body");
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn json_body_without_content_type_is_accepted() {
    let renderer = StubRenderer::new(Outcome::Image);
    let request = Request::builder()
        .method("POST")
        .uri("/api/convert")
        .body(Body::from(r#"{"html": "<p>x</p>", "format": "png"}"#))
        .unwrap();
    let (status, headers, _) = send(app(renderer.clone(), ServiceConfig::default()), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let renderer = StubRenderer::new(Outcome::Image);
    let config = ServiceConfig {
        max_body_bytes: 64,
        ..Default::default()
    };
    let body = serde_json::json!({ "html": "x".repeat(1024), "format": "png" });
    let (status, _, bytes) = post_convert(app(renderer.clone(), config), &body.to_string()).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_message(&bytes), "Request body exceeds 64 bytes");
    assert_eq!(renderer.calls(), 0);
}

#[tokio::test]
async fn render_failure_returns_generic_500() {
    let renderer = StubRenderer::new(Outcome::Fail);
    let (status, headers, bytes) = post_convert(
        app(renderer.clone(), ServiceConfig::default()),
        r#"{"html": "<p>x</p>", "format": "png"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("application/json"));
    let message = error_message(&bytes);
    assert_eq!(message, "An error occurred during conversion");
    assert!(!message.contains("ERR_ABORTED"));
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test]
async fn slow_render_times_out() {
    let renderer = StubRenderer::new(Outcome::Hang(Duration::from_millis(800)));
    let config = ServiceConfig {
        render: RenderSettings {
            render_timeout_ms: 100,
            ..Default::default()
        },
        ..Default::default()
    };
    let (status, _, bytes) = post_convert(app(renderer, config), r#"{"html": "<p>x</p>", "format": "png"}"#).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(error_message(&bytes), "Rendering timed out");
}

struct SlowWorker {
    renders: Arc<AtomicUsize>,
}

impl PoolWorker for SlowWorker {
    fn render(&mut self, request: &ConversionRequest) -> Result<RenderedImage> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(300));
        Ok(RenderedImage::new(PNG_MAGIC.to_vec(), request.format()))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_pool_jobs_are_dropped() {
    let renders = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&renders);
    let pool = RenderPool::new(1, Duration::from_millis(100), move |_| SlowWorker {
        renders: Arc::clone(&counter),
    })
    .unwrap();
    let config = ServiceConfig {
        render: RenderSettings {
            render_timeout_ms: 100,
            ..Default::default()
        },
        ..Default::default()
    };
    let app = router(AppState::new(Arc::new(pool), config));

    let handles = (0..5)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { post_convert(app, r#"{"html": "<p>x</p>", "format": "png"}"#).await.0 })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::GATEWAY_TIMEOUT);
    }

    // Give the worker time to finish its one render and skip the rest
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(renders.load(Ordering::SeqCst) <= 1);
}

#[tokio::test]
async fn index_page_has_export_buttons() {
    let renderer = StubRenderer::new(Outcome::Image);
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, headers, bytes) = send(app(renderer, ServiceConfig::default()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
    let page = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(page.contains("Export as PNG"));
    assert!(page.contains("Export as JPEG"));
    assert!(page.contains("/api/convert"));
}

#[tokio::test]
async fn health_reports_deployment_choice() {
    let renderer = StubRenderer::new(Outcome::Image);
    let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let (status, _, bytes) = send(app(renderer, ServiceConfig::default()), request).await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["strategy"], "server");
    assert_eq!(json["mode"], "per-request");
}

#[tokio::test]
async fn client_strategy_serves_wasm_bundle() {
    let dir = std::env::temp_dir().join(format!("htmlsnap-pkg-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("htmlsnap.js"), "export default function init() {}").unwrap();

    let config = ServiceConfig {
        strategy: RenderStrategy::Client,
        client_assets: Some(dir.clone()),
        ..Default::default()
    };
    let renderer = StubRenderer::new(Outcome::Image);

    let request = Request::builder().uri("/pkg/htmlsnap.js").body(Body::empty()).unwrap();
    let (status, _, bytes) = send(app(renderer.clone(), config.clone()), request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&bytes).contains("init"));

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (_, _, bytes) = send(app(renderer, config), request).await;
    assert!(String::from_utf8_lossy(&bytes).contains("/pkg/htmlsnap.js"));

    std::fs::remove_dir_all(&dir).ok();
}
