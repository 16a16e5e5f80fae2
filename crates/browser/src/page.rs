use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use wabridge_core::{Error, Result};

use crate::cdp::CdpClient;
use crate::driver::{Page, WaitOptions};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A page target driven over its own CDP connection.
pub struct ChromePage {
    cdp: CdpClient,
    browser: Arc<CdpClient>,
    target_id: String,
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl ChromePage {
    pub(crate) fn new(cdp: CdpClient, browser: Arc<CdpClient>, target_id: String) -> Self {
        Self {
            cdp,
            browser,
            target_id,
        }
    }

    async fn probe(&self, selector: &str, visible: bool) -> Result<bool> {
        let expression = probe_expression(selector, visible);
        Ok(self.cdp.evaluate(&expression).await?.as_bool().unwrap_or(false))
    }

    /// Scrolls the element into view and returns its page-space box.
    async fn element_rect(&self, selector: &str) -> Result<Rect> {
        let expression = rect_expression(selector);
        let value = self.cdp.evaluate(&expression).await?;
        parse_rect(&value).ok_or_else(|| Error::NotReady(format!("no element matches {}", selector)))
    }

    async fn move_to(&self, selector: &str) -> Result<(f64, f64)> {
        let rect = self.element_rect(selector).await?;
        // Mouse events take viewport coordinates.
        let scroll = self.cdp.evaluate("[window.scrollX, window.scrollY]").await?;
        let sx = scroll.get(0).and_then(Value::as_f64).unwrap_or(0.0);
        let sy = scroll.get(1).and_then(Value::as_f64).unwrap_or(0.0);
        let x = rect.x - sx + rect.width / 2.0;
        let y = rect.y - sy + rect.height / 2.0;
        self.cdp.dispatch_mouse_event("mouseMoved", x, y, "none", 0).await?;
        Ok((x, y))
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn wait_for_selector(&self, selector: &str, options: WaitOptions) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.probe(selector, options.visible).await.unwrap_or(false) {
                return Ok(());
            }
            if start.elapsed() >= options.timeout {
                return Err(Error::NotReady(format!(
                    "timed out after {}s waiting for {}",
                    options.timeout.as_secs(),
                    selector
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        self.probe(selector, false).await
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let (x, y) = self.move_to(selector).await?;
        self.cdp.dispatch_mouse_event("mousePressed", x, y, "left", 1).await?;
        self.cdp.dispatch_mouse_event("mouseReleased", x, y, "left", 1).await?;
        debug!(selector, "Clicked");
        Ok(())
    }

    async fn hover(&self, selector: &str) -> Result<()> {
        self.move_to(selector).await?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        self.click(selector).await?;
        self.cdp.insert_text(text).await
    }

    async fn evaluate(&self, function: &str, args: Vec<Value>) -> Result<Value> {
        let expression = call_expression(function, &args)?;
        self.cdp.evaluate(&expression).await
    }

    async fn screenshot(&self, selector: &str) -> Result<Vec<u8>> {
        let rect = self.element_rect(selector).await?;
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return Err(Error::NotReady(format!("{} has an empty box", selector)));
        }
        let data = self
            .cdp
            .capture_clip(rect.x, rect.y, rect.width, rect.height)
            .await?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Driver(format!("Invalid screenshot payload: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.browser.close_target(&self.target_id).await
    }
}

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn probe_expression(selector: &str, visible: bool) -> String {
    format!(
        r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) return false;
    if (!{visible}) return true;
    const style = window.getComputedStyle(el);
    const r = el.getBoundingClientRect();
    return style.visibility !== 'hidden' && style.display !== 'none' && r.width > 0 && r.height > 0;
}})()"#,
        sel = js_string(selector),
        visible = visible
    )
}

fn rect_expression(selector: &str) -> String {
    format!(
        r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) return null;
    el.scrollIntoView({{ block: 'center', inline: 'center' }});
    const r = el.getBoundingClientRect();
    return {{ x: r.left + window.scrollX, y: r.top + window.scrollY, width: r.width, height: r.height }};
}})()"#,
        sel = js_string(selector)
    )
}

fn call_expression(function: &str, args: &[Value]) -> Result<String> {
    let args = serde_json::to_string(args)?;
    Ok(format!("({}).apply(null, {})", function.trim(), args))
}

fn parse_rect(value: &Value) -> Option<Rect> {
    Some(Rect {
        x: value.get("x")?.as_f64()?,
        y: value.get("y")?.as_f64()?,
        width: value.get("width")?.as_f64()?,
        height: value.get("height")?.as_f64()?,
    })
}
