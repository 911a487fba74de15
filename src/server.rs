//! HTTP service: UI page and the `POST /api/convert` endpoint

use crate::config::{RenderStrategy, ServiceConfig};
use crate::{ConversionRequest, Error, ErrorKind, RenderedImage, Renderer, Result};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared, read-only state handed to every handler
#[derive(Clone)]
pub struct AppState {
    renderer: Arc<dyn Renderer>,
    config: Arc<ServiceConfig>,
    index: Arc<str>,
}

impl AppState {
    pub fn new(renderer: Arc<dyn Renderer>, config: ServiceConfig) -> Self {
        let index = crate::ui::index_page(config.strategy, &config.render);
        Self {
            renderer,
            config: Arc::new(config),
            index: Arc::from(index),
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(health_handler))
        .route("/api/convert", post(convert_handler))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes));

    if let Some(dir) = &state.config.client_assets {
        app = app.nest_service("/pkg", ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Bind `config.listen` and serve until Ctrl-C
pub async fn serve(config: ServiceConfig, renderer: Arc<dyn Renderer>) -> anyhow::Result<()> {
    let addr: SocketAddr = config.listen;
    info!(
        "htmlsnap listening on http://{} (strategy: {}, mode: {})",
        addr, config.strategy, config.mode
    );

    let app = router(AppState::new(renderer, config));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("htmlsnap stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Run a blocking render on the blocking pool, bounded by `timeout`.
///
/// On expiry the caller gets `Error::Timeout`; the render thread keeps its own
/// CDP deadline and releases its browser when that fires.
pub async fn render_with_timeout(
    renderer: Arc<dyn Renderer>,
    request: ConversionRequest,
    timeout: Duration,
) -> Result<RenderedImage> {
    let task = tokio::task::spawn_blocking(move || renderer.render(&request));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(Error::Other(format!("Render task failed: {}", join))),
        Err(_) => Err(Error::Timeout(timeout.as_millis() as u64)),
    }
}

/// JSON error body with a status derived from the error kind
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Render | ErrorKind::Delivery => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Conversion error: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.public_message() }))).into_response()
    }
}

/// Raw request body; fields stay loose so wrong types become validation errors
#[derive(Debug, Deserialize)]
struct ConvertBody {
    #[serde(default)]
    html: Option<serde_json::Value>,
    #[serde(default)]
    format: Option<serde_json::Value>,
}

impl ConvertBody {
    /// Parse a request body. The content type is not checked, so clients that
    /// omit the JSON header are still served.
    fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| {
            warn!("Rejected convert body: {}", e);
            Error::Validation("Invalid JSON body".into())
        })
    }

    fn into_request(self) -> Result<ConversionRequest> {
        let html = match self.html {
            Some(serde_json::Value::String(s)) => Some(s),
            _ => None,
        };
        let format = match &self.format {
            Some(serde_json::Value::String(s)) => Some(s.as_str()),
            _ => None,
        };
        ConversionRequest::from_parts(html, format)
    }
}

async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(state.index.to_string())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "strategy": state.config.strategy.to_string(),
        "mode": state.config.mode.to_string(),
    }))
}

async fn convert_handler(
    State(state): State<AppState>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> std::result::Result<Response, ApiError> {
    if state.config.strategy == RenderStrategy::Client {
        warn!("Server-side conversion requested while the client strategy is active");
    }

    let raw = body.map_err(|rejection| {
        warn!("Could not read convert body: {}", rejection);
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge(state.config.max_body_bytes)
        } else {
            Error::Validation("Invalid JSON body".into())
        }
    })?;

    let request = ConvertBody::parse(&raw)?.into_request().map_err(|e| {
        info!("Rejected convert request: {}", e);
        e
    })?;

    let started = Instant::now();
    let format = request.format();
    let image = render_with_timeout(
        Arc::clone(&state.renderer),
        request,
        state.config.render.render_timeout(),
    )
    .await?;
    info!(
        "Converted {} ({} bytes) in {}ms",
        format,
        image.bytes.len(),
        started.elapsed().as_millis()
    );

    Ok(image_response(image))
}

/// Binary download response for a rendered image
pub fn image_response(image: RenderedImage) -> Response {
    let disposition = image.content_disposition();
    let mime = image.mime_type();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        image.bytes,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutputFormat;

    #[test]
    fn non_string_fields_fail_validation() {
        let body: ConvertBody = serde_json::from_str(r#"{"html": 42, "format": "png"}"#).unwrap();
        let err = body.into_request().unwrap_err();
        assert_eq!(err.to_string(), "HTML code is required");

        let body: ConvertBody = serde_json::from_str(r#"{"html": "<p>x</p>", "format": ["png"]}"#).unwrap();
        assert_eq!(body.into_request().unwrap_err().to_string(), "Format must be 'png' or 'jpg'");
    }

    #[test]
    fn missing_fields_fail_validation() {
        let body: ConvertBody = serde_json::from_str("{}").unwrap();
        assert!(matches!(body.into_request(), Err(Error::Validation(_))));
    }

    #[test]
    fn api_error_statuses() {
        let resp = ApiError(Error::Validation("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = ApiError(Error::RenderError("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let resp = ApiError(Error::DeliveryError("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let resp = ApiError(Error::Timeout(5)).into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
        let resp = ApiError(Error::PayloadTooLarge(64)).into_response();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn malformed_body_is_invalid_json() {
        let err = ConvertBody::parse(b"{not json").unwrap_err();
        assert_eq!(err.to_string(), "Invalid JSON body");
        assert!(ConvertBody::parse(br#"{"html": "<p>x</p>", "format": "png"}"#).is_ok());
    }

    #[test]
    fn image_response_headers() {
        let resp = image_response(RenderedImage::new(vec![0xff, 0xd8], OutputFormat::Jpeg));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"converted-image.jpg\""
        );
    }
}
