//! htmlsnap
//!
//! Turns a pasted HTML/CSS snippet into a fixed-size raster image (PNG or JPEG)
//! suitable for a social media post. Every render targets a 1080×1350 logical
//! pixel canvas captured at 2x density.
//!
//! # Features
//!
//! - **CDP Backend** (default): loads the markup into headless Chrome and
//!   screenshots the viewport
//! - **Server** (default): HTTP service with a small UI and `POST /api/convert`
//! - **Client**: DOM-to-canvas rendering inside the user's own browser,
//!   compiled to WebAssembly (`--no-default-features --features client`)
//!
//! # Example
//!
//! ```no_run
//! use htmlsnap::{ConversionRequest, Renderer, RenderSettings};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let request = ConversionRequest::new(
//!     "<div style=\"width:100%;height:100%;background:red\"></div>",
//!     "png",
//! )?;
//!
//! let renderer = htmlsnap::cdp::CdpRenderer::new(RenderSettings::default());
//! let image = renderer.render(&request)?;
//! std::fs::write(image.suggested_filename(), &image.bytes)?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub use error::{Error, ErrorKind, Result};

pub mod request;
pub use request::{ConversionRequest, OutputFormat};

#[cfg(feature = "cdp")]
pub mod cdp;

// Reusable renderer instances behind a checkout/checkin channel
#[cfg(feature = "cdp")]
pub mod pool;

#[cfg(feature = "server")]
pub mod config;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "server")]
pub mod ui;

// DOM-to-canvas strategy running in the browser (wasm32)
#[cfg(feature = "client")]
pub mod client;

/// Base name of every downloaded file
pub const OUTPUT_BASENAME: &str = "converted-image";

/// Viewport dimensions in logical (CSS) pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1350,
        }
    }
}

/// How a page is laid out, waited on, and captured.
///
/// The defaults reproduce the fixed social media recipe: a 1080×1350 viewport
/// at 2x density, a network-idle wait, and a 500ms settling delay before
/// capture so CSS transitions finish.
///
/// # Examples
///
/// ```
/// let settings = htmlsnap::RenderSettings::default();
/// assert_eq!(settings.physical_size(), (2160, 2700));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Logical viewport the markup is laid out into
    pub viewport: Viewport,
    /// Device scale factor applied at capture time
    pub device_scale_factor: f64,
    /// Pause after the page is idle, in milliseconds
    pub settle_delay_ms: u64,
    /// Quiet window with no new network activity that counts as idle
    pub network_idle_ms: u64,
    /// Upper bound for a whole render, in milliseconds
    pub render_timeout_ms: u64,
    /// JPEG quality in percent
    pub jpeg_quality: u8,
    /// Explicit Chrome/Chromium binary; autodetected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Whether to keep Chrome's sandbox enabled (usually off inside containers)
    pub sandbox: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            device_scale_factor: 2.0,
            settle_delay_ms: 500,
            network_idle_ms: 500,
            render_timeout_ms: 30000,
            jpeg_quality: 95,
            chrome_path: None,
            sandbox: false,
        }
    }
}

impl RenderSettings {
    /// Size of the captured bitmap in physical pixels
    pub fn physical_size(&self) -> (u32, u32) {
        let scale = self.device_scale_factor;
        (
            (self.viewport.width as f64 * scale).round() as u32,
            (self.viewport.height as f64 * scale).round() as u32,
        )
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    /// Check the settings for values no renderer can honour
    pub fn validate(&self) -> Result<()> {
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::ConfigError("viewport dimensions must be non-zero".into()));
        }
        if !self.device_scale_factor.is_finite() || self.device_scale_factor <= 0.0 {
            return Err(Error::ConfigError("device_scale_factor must be positive".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::ConfigError("jpeg_quality must be within 1..=100".into()));
        }
        if self.render_timeout_ms == 0 {
            return Err(Error::ConfigError("render_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }
}

/// An encoded image ready to be handed to the caller
#[derive(Debug, Clone)]
pub struct RenderedImage {
    /// Encoded image bytes (PNG or JPEG container)
    pub bytes: Vec<u8>,
    /// Container format of `bytes`
    pub format: OutputFormat,
}

impl RenderedImage {
    pub fn new(bytes: Vec<u8>, format: OutputFormat) -> Self {
        Self { bytes, format }
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// File name offered to the user, e.g. `converted-image.png`
    pub fn suggested_filename(&self) -> String {
        format!("{}.{}", OUTPUT_BASENAME, self.format.extension())
    }

    /// Value for the `Content-Disposition` response header
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.suggested_filename())
    }
}

/// A rendering strategy: turns a validated request into an encoded image.
///
/// Implementations own their engine resources and must release them on every
/// exit path, including errors. Calls block the current thread; async callers
/// should go through `spawn_blocking`.
pub trait Renderer: Send + Sync {
    /// Render the request's markup and encode it in the requested format
    fn render(&self, request: &ConversionRequest) -> Result<RenderedImage>;
}

impl<R: Renderer + ?Sized> Renderer for std::sync::Arc<R> {
    fn render(&self, request: &ConversionRequest) -> Result<RenderedImage> {
        (**self).render(request)
    }
}

/// Build the server-side renderer selected by the deployment configuration.
///
/// `RendererMode::PerRequest` launches a fresh browser for every call;
/// `RendererMode::Pooled` keeps `pool_size` warm browsers behind a worker pool.
#[cfg(feature = "server")]
pub fn new_renderer(config: &config::ServiceConfig) -> Result<std::sync::Arc<dyn Renderer>> {
    config.validate()?;
    let renderer: std::sync::Arc<dyn Renderer> = match config.mode {
        config::RendererMode::PerRequest => {
            std::sync::Arc::new(cdp::CdpRenderer::new(config.render.clone()))
        }
        config::RendererMode::Pooled => {
            std::sync::Arc::new(pool::RenderPool::cdp(config.pool_size, config.render.clone())?)
        }
    };
    Ok(renderer)
}
