//! Deployment configuration for the conversion service

use crate::{Error, RenderSettings, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where the markup gets rasterized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderStrategy {
    /// Headless browser on the server behind `POST /api/convert`
    #[default]
    Server,
    /// DOM-to-canvas in the visitor's browser (wasm bundle under `/pkg/`)
    Client,
}

/// How server-side browsers are managed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RendererMode {
    /// Launch and tear down a browser for every request
    #[default]
    PerRequest,
    /// Keep a fixed set of warm browsers
    Pooled,
}

impl fmt::Display for RenderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RenderStrategy::Server => "server",
            RenderStrategy::Client => "client",
        })
    }
}

impl FromStr for RenderStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "server" => Ok(RenderStrategy::Server),
            "client" => Ok(RenderStrategy::Client),
            other => Err(Error::ConfigError(format!("unknown strategy '{}'", other))),
        }
    }
}

impl fmt::Display for RendererMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RendererMode::PerRequest => "per-request",
            RendererMode::Pooled => "pooled",
        })
    }
}

impl FromStr for RendererMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "per-request" => Ok(RendererMode::PerRequest),
            "pooled" => Ok(RendererMode::Pooled),
            other => Err(Error::ConfigError(format!("unknown renderer mode '{}'", other))),
        }
    }
}

/// Service configuration.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```
/// let cfg = htmlsnap::config::ServiceConfig::from_toml_str(r#"
///     mode = "pooled"
///     pool_size = 2
///
///     [render]
///     settle_delay_ms = 250
/// "#).unwrap();
/// assert_eq!(cfg.pool_size, 2);
/// assert_eq!(cfg.render.settle_delay_ms, 250);
/// assert_eq!(cfg.render.viewport.width, 1080);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the HTTP service binds to
    pub listen: SocketAddr,
    pub strategy: RenderStrategy,
    pub mode: RendererMode,
    /// Number of warm browsers in `pooled` mode
    pub pool_size: usize,
    /// Largest accepted request body
    pub max_body_bytes: usize,
    /// Directory holding the wasm client bundle, served under `/pkg/`
    pub client_assets: Option<PathBuf>,
    pub render: RenderSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
            strategy: RenderStrategy::default(),
            mode: RendererMode::default(),
            pool_size: crate::pool::default_pool_size(),
            max_body_bytes: 5 * 1024 * 1024,
            client_assets: None,
            render: RenderSettings::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// Read a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.render.validate()?;
        if self.mode == RendererMode::Pooled && self.pool_size == 0 {
            return Err(Error::ConfigError("pool_size must be at least 1 in pooled mode".into()));
        }
        if self.strategy == RenderStrategy::Client && self.client_assets.is_none() {
            return Err(Error::ConfigError("client strategy needs client_assets".into()));
        }
        if self.max_body_bytes == 0 {
            return Err(Error::ConfigError("max_body_bytes must be non-zero".into()));
        }
        Ok(())
    }
}
