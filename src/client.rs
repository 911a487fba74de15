//! Client-side renderer: rasterizes markup inside the visitor's browser.
//!
//! The markup is injected into an offscreen container of the viewport's size,
//! given time to load its images and fonts, and captured with `html2canvas`
//! (which must be loaded on the page as a global). The encoded image is then
//! offered as a download through a temporary object URL.
//!
//! Every DOM node and object URL created here is owned by a guard that removes
//! or revokes it on drop, so nothing leaks when a step fails.

use crate::{ConversionRequest, Error, OutputFormat, RenderSettings, RenderedImage, Result, Viewport};
use js_sys::{Array, Function, Promise, Uint8Array};
use log::{warn, Level, LevelFilter, Log, Metadata, Record};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Blob, BlobPropertyBag, Document, HtmlAnchorElement, HtmlCanvasElement, HtmlElement, HtmlImageElement, Url, Window};

const TIMEOUT_SENTINEL: &str = "__htmlsnap_timeout__";

/// Forwards `log` records to the browser console
struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[htmlsnap] {}", record.args()));
        match record.level() {
            Level::Error => web_sys::console::error_1(&line),
            Level::Warn => web_sys::console::warn_1(&line),
            Level::Info => web_sys::console::info_1(&line),
            Level::Debug | Level::Trace => web_sys::console::debug_1(&line),
        }
    }

    fn flush(&self) {}
}

/// Route this module's log output to the console; runs when the module loads
#[wasm_bindgen(start)]
pub fn init_console_logging() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(catch, js_name = html2canvas)]
    fn html2canvas(element: &HtmlElement, options: &JsValue) -> std::result::Result<Promise, JsValue>;
}

/// Options object passed to `html2canvas`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CanvasOptions {
    width: u32,
    height: u32,
    window_width: u32,
    window_height: u32,
    scale: f64,
    #[serde(rename = "useCORS")]
    use_cors: bool,
    /// `null` keeps the canvas transparent
    background_color: Option<&'static str>,
    logging: bool,
}

impl CanvasOptions {
    fn new(settings: &RenderSettings, format: OutputFormat) -> Self {
        Self {
            width: settings.viewport.width,
            height: settings.viewport.height,
            window_width: settings.viewport.width,
            window_height: settings.viewport.height,
            scale: settings.device_scale_factor,
            use_cors: true,
            background_color: if format.transparent_background() { None } else { Some("#ffffff") },
            logging: false,
        }
    }
}

/// MIME type and `toBlob` quality argument for a format
fn encoder_params(settings: &RenderSettings, format: OutputFormat) -> (&'static str, f64) {
    match format {
        OutputFormat::Png => (format.mime_type(), 1.0),
        OutputFormat::Jpeg => (format.mime_type(), settings.jpeg_quality as f64 / 100.0),
    }
}

fn js_message(value: &JsValue) -> String {
    if let Some(s) = value.as_string() {
        return s;
    }
    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        return String::from(err.message());
    }
    format!("{:?}", value)
}

fn window() -> Result<Window> {
    web_sys::window().ok_or_else(|| Error::InitializationError("no window available".into()))
}

fn document(window: &Window) -> Result<Document> {
    window
        .document()
        .ok_or_else(|| Error::InitializationError("no document available".into()))
}

fn body(document: &Document) -> Result<HtmlElement> {
    document
        .body()
        .ok_or_else(|| Error::InitializationError("document has no body".into()))
}

/// Promise resolving with `value` after `ms` milliseconds
fn timer(window: &Window, ms: u64, value: JsValue) -> Promise {
    let delay = ms.min(i32::MAX as u64) as i32;
    Promise::new(&mut |resolve: Function, _reject: Function| {
        let args = Array::of1(&value);
        if let Err(e) = window.set_timeout_with_callback_and_timeout_and_arguments(&resolve, delay, &args) {
            warn!("setTimeout failed: {}", js_message(&e));
            let _ = resolve.call1(&JsValue::NULL, &value);
        }
    })
}

async fn sleep(window: &Window, ms: u64) -> Result<()> {
    JsFuture::from(timer(window, ms, JsValue::UNDEFINED))
        .await
        .map(|_| ())
        .map_err(|e| Error::Other(js_message(&e)))
}

/// Await `promise` for at most `ms`; `Ok(None)` means the time ran out
async fn race(window: &Window, promise: &Promise, ms: u64) -> std::result::Result<Option<JsValue>, JsValue> {
    let sentinel = JsValue::from_str(TIMEOUT_SENTINEL);
    let raced = Promise::race(&Array::of2(promise, &timer(window, ms, sentinel)));
    let value = JsFuture::from(raced).await?;
    if value.as_string().as_deref() == Some(TIMEOUT_SENTINEL) {
        return Ok(None);
    }
    Ok(Some(value))
}

/// Offscreen container holding the markup; detached on drop
struct OffscreenContainer {
    element: HtmlElement,
}

impl OffscreenContainer {
    fn attach(document: &Document, viewport: Viewport, markup: &str) -> Result<Self> {
        let element = document
            .create_element("div")
            .map_err(|e| Error::LoadError(js_message(&e)))?
            .dyn_into::<HtmlElement>()
            .map_err(|_| Error::LoadError("created element is not an HTMLElement".into()))?;
        let container = Self { element };

        let style = container.element.style();
        let width = format!("{}px", viewport.width);
        let height = format!("{}px", viewport.height);
        for (name, value) in [
            ("position", "fixed"),
            ("left", "-10000px"),
            ("top", "0"),
            ("width", width.as_str()),
            ("height", height.as_str()),
            ("overflow", "hidden"),
            ("pointer-events", "none"),
        ] {
            style
                .set_property(name, value)
                .map_err(|e| Error::LoadError(js_message(&e)))?;
        }

        container.element.set_inner_html(markup);
        body(document)?
            .append_child(&container.element)
            .map_err(|e| Error::LoadError(js_message(&e)))?;
        Ok(container)
    }
}

impl Drop for OffscreenContainer {
    fn drop(&mut self) {
        self.element.remove();
    }
}

/// Temporary object URL; revoked on drop
struct ObjectUrl(String);

impl ObjectUrl {
    fn create(blob: &Blob) -> Result<Self> {
        Url::create_object_url_with_blob(blob)
            .map(ObjectUrl)
            .map_err(|e| Error::DeliveryError(js_message(&e)))
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        if let Err(e) = Url::revoke_object_url(&self.0) {
            warn!("Failed to revoke object URL: {}", js_message(&e));
        }
    }
}

/// Synthetic download link; removed from the document on drop
struct DownloadAnchor(HtmlAnchorElement);

impl Drop for DownloadAnchor {
    fn drop(&mut self) {
        self.0.remove();
    }
}

/// Wait for images and fonts inside `container`, bounded by `timeout_ms`.
///
/// Failed image loads count as settled; running out of time is not an error.
async fn wait_for_resources(window: &Window, document: &Document, container: &HtmlElement, timeout_ms: u64) -> Result<()> {
    let pending = Array::new();

    let images = container
        .query_selector_all("img")
        .map_err(|e| Error::LoadError(js_message(&e)))?;
    for i in 0..images.length() {
        if let Some(img) = images.item(i).and_then(|n| n.dyn_into::<HtmlImageElement>().ok()) {
            pending.push(&img.decode());
        }
    }
    if let Ok(ready) = document.fonts().ready() {
        pending.push(&ready);
    }

    let settled = Promise::all_settled(&pending);
    match race(window, &settled, timeout_ms).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => {
            warn!("Resources still loading after {}ms; capturing anyway", timeout_ms);
            Ok(())
        }
        Err(e) => Err(Error::LoadError(js_message(&e))),
    }
}

/// Encode a canvas with `toBlob`
async fn canvas_to_blob(canvas: &HtmlCanvasElement, mime: &str, quality: f64) -> Result<Blob> {
    let promise = Promise::new(&mut |resolve: Function, reject: Function| {
        let reject_cb = reject.clone();
        let callback = Closure::once_into_js(move |blob: JsValue| {
            if blob.is_null() {
                let _ = reject_cb.call1(&JsValue::NULL, &JsValue::from_str("canvas produced no image data"));
            } else {
                let _ = resolve.call1(&JsValue::NULL, &blob);
            }
        });
        if let Err(e) = canvas.to_blob_with_type_and_encoder_options(callback.unchecked_ref(), mime, &JsValue::from_f64(quality)) {
            let _ = reject.call1(&JsValue::NULL, &e);
        }
    });

    JsFuture::from(promise)
        .await
        .map_err(|e| Error::DeliveryError(js_message(&e)))?
        .dyn_into::<Blob>()
        .map_err(|_| Error::DeliveryError("toBlob returned a non-Blob value".into()))
}

async fn blob_bytes(blob: &Blob) -> Result<Vec<u8>> {
    let buffer = JsFuture::from(blob.array_buffer())
        .await
        .map_err(|e| Error::DeliveryError(js_message(&e)))?;
    Ok(Uint8Array::new(&buffer).to_vec())
}

/// Renders markup in the current page with `html2canvas`
#[derive(Debug, Clone, Default)]
pub struct ClientRenderer {
    settings: RenderSettings,
}

impl ClientRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    /// Rasterize the request's markup and encode it.
    ///
    /// The offscreen container is detached on every exit path.
    pub async fn render(&self, request: &ConversionRequest) -> Result<RenderedImage> {
        let window = window()?;
        let document = document(&window)?;
        let settings = &self.settings;

        let container = OffscreenContainer::attach(&document, settings.viewport, request.markup())?;
        wait_for_resources(&window, &document, &container.element, settings.render_timeout_ms).await?;
        sleep(&window, settings.settle_delay_ms).await?;

        let options = CanvasOptions::new(settings, request.format())
            .serialize(&serde_wasm_bindgen::Serializer::new().serialize_missing_as_null(true))
            .map_err(|e| Error::RenderError(e.to_string()))?;
        let capture = html2canvas(&container.element, &options).map_err(|e| Error::RenderError(js_message(&e)))?;
        let canvas = race(&window, &capture, settings.render_timeout_ms)
            .await
            .map_err(|e| Error::RenderError(js_message(&e)))?
            .ok_or(Error::Timeout(settings.render_timeout_ms))?
            .dyn_into::<HtmlCanvasElement>()
            .map_err(|_| Error::RenderError("html2canvas did not return a canvas".into()))?;
        drop(container);

        let (mime, quality) = encoder_params(settings, request.format());
        let blob = canvas_to_blob(&canvas, mime, quality).await?;
        let bytes = blob_bytes(&blob).await?;
        Ok(RenderedImage::new(bytes, request.format()))
    }
}

/// Offer `image` to the user as a file download.
///
/// The object URL is revoked and the anchor removed even if the click throws.
pub fn download(image: &RenderedImage) -> Result<()> {
    let window = window()?;
    let document = document(&window)?;

    let parts = Array::of1(&Uint8Array::from(image.bytes.as_slice()));
    let bag = BlobPropertyBag::new();
    bag.set_type(image.mime_type());
    let blob = Blob::new_with_u8_array_sequence_and_options(&parts, &bag)
        .map_err(|e| Error::DeliveryError(js_message(&e)))?;
    let url = ObjectUrl::create(&blob)?;

    let anchor = document
        .create_element("a")
        .map_err(|e| Error::DeliveryError(js_message(&e)))?
        .dyn_into::<HtmlAnchorElement>()
        .map(DownloadAnchor)
        .map_err(|_| Error::DeliveryError("created element is not an anchor".into()))?;
    anchor.0.set_href(&url.0);
    anchor.0.set_download(&image.suggested_filename());
    anchor
        .0
        .style()
        .set_property("display", "none")
        .map_err(|e| Error::DeliveryError(js_message(&e)))?;
    body(&document)?
        .append_child(&anchor.0)
        .map_err(|e| Error::DeliveryError(js_message(&e)))?;
    anchor.0.click();
    Ok(())
}

/// Read the settings object the page passes in; absent means defaults
fn settings_from_js(value: JsValue) -> Result<RenderSettings> {
    if value.is_undefined() || value.is_null() {
        return Ok(RenderSettings::default());
    }
    let settings: RenderSettings =
        serde_wasm_bindgen::from_value(value).map_err(|e| Error::ConfigError(e.to_string()))?;
    settings.validate()?;
    Ok(settings)
}

/// Validate, render, and download in one call (used by the UI page).
///
/// `settings` is the service's render configuration as embedded in the page.
/// Rejects with a JS `Error` whose message is safe to display.
#[wasm_bindgen]
pub async fn export_image(markup: String, format: String, settings: JsValue) -> std::result::Result<(), JsValue> {
    let to_js = |e: Error| -> JsValue {
        warn!("Export failed: {}", e);
        js_sys::Error::new(&e.public_message()).into()
    };

    let settings = settings_from_js(settings).map_err(to_js)?;
    let request = ConversionRequest::new(markup, &format).map_err(to_js)?;
    let image = ClientRenderer::new(settings).render(&request).await.map_err(to_js)?;
    download(&image).map_err(to_js)
}
