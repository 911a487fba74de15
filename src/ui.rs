//! The single-page UI served at `/`

use crate::config::RenderStrategy;
use crate::RenderSettings;
use log::warn;

const PAGE_TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>HTML to Image Converter</title>
<style>
  body { margin: 0; font-family: system-ui, sans-serif; background: #f9fafb; color: #111827; }
  main { max-width: 960px; margin: 0 auto; padding: 2rem 1rem; }
  textarea { width: 100%; height: 24rem; box-sizing: border-box; padding: 1rem; font: 13px ui-monospace, monospace; border: 1px solid #d1d5db; border-radius: 8px; resize: none; }
  .actions { display: flex; gap: 1rem; margin-top: 1rem; }
  button { flex: 1; padding: .75rem 1.5rem; border: 0; border-radius: 8px; background: #4f46e5; color: #fff; font-weight: 500; cursor: pointer; }
  button:disabled { opacity: .5; cursor: not-allowed; }
  #error { display: none; margin-top: 1rem; padding: 1rem; background: #fef2f2; border: 1px solid #fecaca; border-radius: 8px; color: #991b1b; }
</style>
</head>
<body data-strategy="{{STRATEGY}}">
<main>
  <h1>HTML to Image Converter</h1>
  <p>Paste HTML and CSS below and export a {{WIDTH}}&times;{{HEIGHT}} image for social media.</p>
  <label for="html-code">HTML/CSS Code</label>
  <textarea id="html-code" placeholder="Paste your HTML and CSS code here..."></textarea>
  <div id="error" role="alert"></div>
  <div class="actions">
    <button type="button" data-format="png">Export as PNG</button>
    <button type="button" data-format="jpg">Export as JPEG</button>
  </div>
</main>
{{STRATEGY_SCRIPT}}
<script type="module">
  const input = document.getElementById('html-code');
  const errorBox = document.getElementById('error');
  const buttons = Array.from(document.querySelectorAll('button[data-format]'));
  const labels = buttons.map(function (b) { return b.textContent; });

  function setBusy(busy) {
    buttons.forEach(function (b, i) {
      b.disabled = busy;
      b.textContent = busy ? 'Converting...' : labels[i];
    });
  }

  function showError(message) {
    errorBox.textContent = message || '';
    errorBox.style.display = message ? 'block' : 'none';
  }

  buttons.forEach(function (button) {
    button.addEventListener('click', async function () {
      const html = input.value;
      if (!html.trim()) {
        showError('Please paste your HTML/CSS code');
        return;
      }
      showError(null);
      setBusy(true);
      try {
        await window.htmlsnapExport(html, button.dataset.format);
      } catch (err) {
        showError(err instanceof Error ? err.message : String(err || 'An error occurred'));
      } finally {
        setBusy(false);
      }
    });
  });
</script>
</body>
</html>
"#;

const SERVER_SCRIPT: &str = r#"<script>
  window.htmlsnapExport = async function (html, format) {
    const response = await fetch('/api/convert', {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({ html: html, format: format })
    });
    if (!response.ok) {
      let message = 'Conversion failed';
      try {
        const data = await response.json();
        message = data.error || message;
      } catch (e) {}
      throw new Error(message);
    }
    const blob = await response.blob();
    const url = URL.createObjectURL(blob);
    const a = document.createElement('a');
    try {
      a.href = url;
      a.download = '{{BASENAME}}.' + format;
      a.style.display = 'none';
      document.body.appendChild(a);
      a.click();
    } finally {
      URL.revokeObjectURL(url);
      a.remove();
    }
  };
</script>"#;

const CLIENT_SCRIPT: &str = r#"<script id="htmlsnap-settings" type="application/json">{{SETTINGS}}</script>
<script src="https://cdn.jsdelivr.net/npm/html2canvas@1.4.1/dist/html2canvas.min.js"></script>
<script type="module">
  import init, { export_image } from '/pkg/htmlsnap.js';
  const ready = init();
  const settings = JSON.parse(document.getElementById('htmlsnap-settings').textContent);
  window.htmlsnapExport = async function (html, format) {
    await ready;
    await export_image(html, format, settings);
  };
</script>"#;

/// Render settings as handed to the in-browser renderer.
///
/// Server-only fields are cleared so local paths never reach the page.
fn client_settings_json(settings: &RenderSettings) -> String {
    let client = RenderSettings {
        chrome_path: None,
        sandbox: false,
        ..settings.clone()
    };
    serde_json::to_string(&client)
        .map(|json| json.replace('<', "\\u003c"))
        .unwrap_or_else(|e| {
            warn!("Falling back to default client settings: {}", e);
            "{}".to_string()
        })
}

/// Render the UI page for the configured strategy
pub fn index_page(strategy: RenderStrategy, settings: &RenderSettings) -> String {
    let script = match strategy {
        RenderStrategy::Server => SERVER_SCRIPT.replace("{{BASENAME}}", crate::OUTPUT_BASENAME),
        RenderStrategy::Client => CLIENT_SCRIPT.replace("{{SETTINGS}}", &client_settings_json(settings)),
    };
    PAGE_TEMPLATE
        .replace("{{STRATEGY}}", &strategy.to_string())
        .replace("{{WIDTH}}", &settings.viewport.width.to_string())
        .replace("{{HEIGHT}}", &settings.viewport.height.to_string())
        .replace("{{STRATEGY_SCRIPT}}", &script)
}
