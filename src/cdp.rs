//! Chrome DevTools Protocol renderer

use crate::{ConversionRequest, Error, OutputFormat, RenderSettings, RenderedImage, Renderer, Result};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page, DOM};
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info, warn};
use serde::Deserialize;
use std::ffi::OsString;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the page is polled while waiting for network idle
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default idle timeout of `headless_chrome`; a browser with no traffic for
/// this long is considered gone.
const PER_REQUEST_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

const ACTIVITY_SCRIPT: &str = r#"JSON.stringify({
    ready: document.readyState === 'complete',
    resources: performance.getEntriesByType('resource').length,
    pendingImages: Array.from(document.images).filter(function (img) { return !img.complete; }).length,
    fontsLoading: !!(document.fonts && document.fonts.status === 'loading')
})"#;

/// A headless Chrome process scoped to this value.
///
/// The browser process is killed when the session is dropped, so every exit
/// path of a render (success, `?`, panic unwinding) releases it.
pub struct BrowserSession {
    browser: Browser,
    settings: RenderSettings,
}

impl BrowserSession {
    /// Launch a browser configured for `settings`
    pub fn launch(settings: RenderSettings) -> Result<Self> {
        Self::launch_with_idle_timeout(settings, PER_REQUEST_IDLE_TIMEOUT)
    }

    /// Launch a browser that tolerates `idle` without traffic before
    /// `headless_chrome` gives up on it. Pooled sessions use a long value.
    pub fn launch_with_idle_timeout(settings: RenderSettings, idle: Duration) -> Result<Self> {
        let flags = chrome_flags(&settings);
        let args = flags.iter().map(|f| f.as_os_str()).collect::<Vec<_>>();

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(settings.sandbox)
            .window_size(Some((settings.viewport.width, settings.viewport.height)))
            .path(settings.chrome_path.clone())
            .idle_browser_timeout(idle)
            .args(args)
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let started = Instant::now();
        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;
        info!("Launched headless browser in {}ms", started.elapsed().as_millis());

        Ok(Self { browser, settings })
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// PID of the browser process, if it was launched by us
    pub fn process_id(&self) -> Option<u32> {
        self.browser.get_process_id()
    }

    /// Render one request in a fresh tab of this browser.
    ///
    /// The tab is closed afterwards whether or not the capture succeeded.
    pub fn capture(&self, request: &ConversionRequest) -> Result<RenderedImage> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;
        let page = PageGuard(tab);
        page.0.set_default_timeout(self.settings.render_timeout());

        let bytes = capture_markup(&page.0, &self.settings, request)?;
        debug!("Captured {} bytes as {}", bytes.len(), request.format());
        Ok(RenderedImage::new(bytes, request.format()))
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        debug!("Releasing headless browser");
    }
}

/// Closes its tab on drop
struct PageGuard(Arc<Tab>);

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.close(false) {
            warn!("Failed to close tab: {}", e);
        }
    }
}

/// Command line flags for the browser process
fn chrome_flags(settings: &RenderSettings) -> Vec<OsString> {
    let mut flags = vec![
        OsString::from("--disable-dev-shm-usage"),
        OsString::from("--disable-gpu"),
        OsString::from("--no-first-run"),
        OsString::from("--hide-scrollbars"),
    ];
    if !settings.sandbox {
        flags.push(OsString::from("--disable-setuid-sandbox"));
    }
    flags
}

/// Pin the tab's layout viewport and device pixel ratio
pub fn apply_viewport(tab: &Tab, settings: &RenderSettings) -> Result<()> {
    tab.call_method(Emulation::SetDeviceMetricsOverride {
        width: settings.viewport.width,
        height: settings.viewport.height,
        device_scale_factor: settings.device_scale_factor,
        mobile: false,
        scale: None,
        screen_width: None,
        screen_height: None,
        position_x: None,
        position_y: None,
        dont_set_visible_size: None,
        screen_orientation: None,
        viewport: None,
        display_feature: None,
        device_posture: None,
    })
    .map_err(|e| Error::InitializationError(format!("Failed to set viewport: {}", e)))?;
    Ok(())
}

/// Replace the main frame's document with `markup`.
///
/// The tab is first pointed at `about:blank` so the markup gets a fresh
/// document; its size is bounded only by the request body limit.
pub fn set_content(tab: &Tab, markup: &str) -> Result<()> {
    tab.navigate_to("about:blank")
        .map_err(|e| Error::LoadError(format!("Navigation to about:blank failed: {}", e)))?;
    tab.wait_until_navigated()
        .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;

    let tree = tab
        .call_method(Page::GetFrameTree(None))
        .map_err(|e| Error::LoadError(format!("Failed to read frame tree: {}", e)))?;
    tab.call_method(Page::SetDocumentContent {
        frame_id: tree.frame_tree.frame.id,
        html: markup.to_string(),
    })
    .map_err(|e| Error::LoadError(format!("Setting content failed: {}", e)))?;
    Ok(())
}

/// Load markup into `tab`, wait for it to settle and screenshot the viewport.
///
/// Steps: pin the viewport and density, clear the default background for
/// PNG, set the markup as the document, wait for network idle, sleep the
/// settling delay, then capture the `viewport` clip.
pub fn capture_markup(tab: &Tab, settings: &RenderSettings, request: &ConversionRequest) -> Result<Vec<u8>> {
    let deadline = Instant::now() + settings.render_timeout();

    apply_viewport(tab, settings)?;

    if request.format().transparent_background() {
        tab.call_method(Emulation::SetDefaultBackgroundColorOverride {
            color: Some(DOM::RGBA {
                r: 0,
                g: 0,
                b: 0,
                a: Some(0.0),
            }),
        })
        .map_err(|e| Error::RenderError(format!("Failed to clear background: {}", e)))?;
    }

    set_content(tab, request.markup())?;
    wait_for_network_idle(tab, settings, deadline)?;

    // Let CSS transitions and animations finish
    std::thread::sleep(settings.settle_delay());

    let (format, quality) = match request.format() {
        OutputFormat::Png => (Page::CaptureScreenshotFormatOption::Png, None),
        OutputFormat::Jpeg => (
            Page::CaptureScreenshotFormatOption::Jpeg,
            Some(settings.jpeg_quality as u32),
        ),
    };
    let clip = Page::Viewport {
        x: 0.0,
        y: 0.0,
        width: settings.viewport.width as f64,
        height: settings.viewport.height as f64,
        scale: 1.0,
    };

    let data = tab
        .capture_screenshot(format, quality, Some(clip), true)
        .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))?;

    if data.is_empty() {
        return Err(Error::RenderError("Screenshot returned no data".into()));
    }
    Ok(data)
}

/// What the page reports about outstanding work
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageActivity {
    /// `document.readyState === 'complete'`
    pub ready: bool,
    /// Number of resource-timing entries seen so far
    pub resources: u64,
    /// Images that have not finished loading or failing
    pub pending_images: u64,
    /// Whether web fonts are still loading
    pub fonts_loading: bool,
}

impl PageActivity {
    fn is_settled(&self) -> bool {
        self.ready && self.pending_images == 0 && !self.fonts_loading
    }
}

/// Tracks a page until it has had no new network activity for a quiet window.
///
/// Fed with periodic `PageActivity` samples; reports idle once the document is
/// complete, nothing is pending, and the resource count has held steady for
/// `window`.
#[derive(Debug)]
pub struct NetworkIdle {
    window: Duration,
    last_resources: Option<u64>,
    quiet_since: Option<Instant>,
}

impl NetworkIdle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_resources: None,
            quiet_since: None,
        }
    }

    /// Record a sample taken at `now`; returns true once the page is idle
    pub fn observe(&mut self, activity: &PageActivity, now: Instant) -> bool {
        let changed = self.last_resources != Some(activity.resources);
        self.last_resources = Some(activity.resources);

        if !activity.is_settled() {
            self.quiet_since = None;
            return false;
        }
        if changed {
            self.quiet_since = Some(now);
        }
        let since = *self.quiet_since.get_or_insert(now);
        now.duration_since(since) >= self.window
    }
}

fn sample_activity(tab: &Tab) -> Result<PageActivity> {
    let eval = tab
        .evaluate(ACTIVITY_SCRIPT, false)
        .map_err(|e| Error::LoadError(format!("Activity probe failed: {}", e)))?;
    let raw = eval
        .value
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .ok_or_else(|| Error::LoadError("Activity probe returned no value".into()))?;
    serde_json::from_str(&raw).map_err(|e| Error::LoadError(format!("Malformed activity probe result: {}", e)))
}

fn wait_for_network_idle(tab: &Tab, settings: &RenderSettings, deadline: Instant) -> Result<()> {
    let mut idle = NetworkIdle::new(Duration::from_millis(settings.network_idle_ms));
    loop {
        let activity = sample_activity(tab)?;
        let now = Instant::now();
        if idle.observe(&activity, now) {
            debug!("Page idle after {} resources", activity.resources);
            return Ok(());
        }
        if now >= deadline {
            warn!("Page never went idle: {:?}", activity);
            return Err(Error::Timeout(settings.render_timeout_ms));
        }
        std::thread::sleep(IDLE_POLL_INTERVAL);
    }
}

/// Per-request renderer: every call launches its own browser and tears it
/// down before returning.
#[derive(Debug, Clone)]
pub struct CdpRenderer {
    settings: RenderSettings,
}

impl CdpRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }
}

impl Renderer for CdpRenderer {
    fn render(&self, request: &ConversionRequest) -> Result<RenderedImage> {
        let session = BrowserSession::launch(self.settings.clone())?;
        session.capture(request)
    }
}
