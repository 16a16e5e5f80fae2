//! The browser capability the messaging core is written against.
//!
//! Implementations own the real rendering engine; the core only ever sees
//! these traits, which keeps it testable against a scripted fake.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use wabridge_core::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Require a rendered, non-hidden box, not just DOM presence.
    pub visible: bool,
    pub timeout: Duration,
}

impl WaitOptions {
    pub fn present(timeout: Duration) -> Self {
        Self {
            visible: false,
            timeout,
        }
    }

    pub fn visible(timeout: Duration) -> Self {
        Self {
            visible: true,
            timeout,
        }
    }
}

/// Launches isolated browser processes.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Starts a browser dedicated to `session`. Failures are `Error::Launch`.
    async fn launch(&self, session: &str) -> Result<Arc<dyn BrowserHandle>>;
}

/// One running browser process.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// OS process id of the browser, when known.
    fn pid(&self) -> Option<u32>;

    /// Opens a new page and navigates it to `url`.
    async fn new_page(&self, url: &str) -> Result<Box<dyn Page>>;

    async fn close(&self) -> Result<()>;
}

/// A single page. Element lookups that find nothing fail with
/// `Error::NotReady` so callers can retry them.
#[async_trait]
pub trait Page: Send + Sync {
    async fn wait_for_selector(&self, selector: &str, options: WaitOptions) -> Result<()>;

    /// Whether `selector` currently matches anything.
    async fn exists(&self, selector: &str) -> Result<bool>;

    async fn click(&self, selector: &str) -> Result<()>;

    async fn hover(&self, selector: &str) -> Result<()>;

    /// Focuses the element and types `text` into it.
    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;

    /// Calls the JavaScript function source `function` with JSON `args`
    /// inside the page and returns its (awaited) result.
    async fn evaluate(&self, function: &str, args: Vec<Value>) -> Result<Value>;

    /// PNG capture of the first element matching `selector`.
    async fn screenshot(&self, selector: &str) -> Result<Vec<u8>>;

    async fn close(&self) -> Result<()>;
}
