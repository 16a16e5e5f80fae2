//! Chromium launcher speaking CDP: one browser process and profile per session.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wabridge_core::{BrowserConfig, Error, Paths, Result};

use crate::cdp::CdpClient;
use crate::driver::{BrowserDriver, BrowserHandle, Page};
use crate::page::ChromePage;

/// Launches headless Chromium with a persistent per-session profile.
pub struct ChromeDriver {
    config: BrowserConfig,
    paths: Paths,
}

impl ChromeDriver {
    pub fn new(config: BrowserConfig, paths: Paths) -> Self {
        Self { config, paths }
    }

    async fn launch_inner(&self, session: &str) -> Result<ChromeBrowser> {
        let binary = match &self.config.executable {
            Some(path) => path.clone(),
            None => find_browser_binary()
                .ok_or_else(|| Error::Launch("Chrome/Chromium not found. Please install it.".to_string()))?,
        };

        let user_data_dir = self.paths.profile_dir(session);
        std::fs::create_dir_all(&user_data_dir)
            .map_err(|e| Error::Launch(format!("Failed to create user data dir: {}", e)))?;

        let debug_port = find_free_port().await?;
        let args = build_browser_args(&self.config, debug_port, &user_data_dir);

        info!(
            session,
            port = debug_port,
            headless = self.config.headless,
            "Launching browser for session"
        );

        let child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Launch(format!("Failed to launch {}: {}", binary, e)))?;
        let pid = child.id();

        let browser_ws_url =
            match wait_for_cdp_ready(debug_port, Duration::from_secs(self.config.launch_timeout_secs)).await {
                Ok(url) => url,
                Err(e) => {
                    let mut child = child;
                    let _ = child.kill().await;
                    return Err(e);
                }
            };

        let cdp = CdpClient::connect(&browser_ws_url)
            .await
            .map_err(|e| Error::Launch(e.to_string()))?;

        info!(session, pid = ?pid, "CDP connection established (browser target)");

        Ok(ChromeBrowser {
            session: session.to_string(),
            debug_port,
            pid,
            cdp: Arc::new(cdp),
            child: Mutex::new(Some(child)),
            user_agent: self.config.user_agent.clone(),
            navigation_timeout: Duration::from_secs(self.config.navigation_timeout_secs),
        })
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn launch(&self, session: &str) -> Result<Arc<dyn BrowserHandle>> {
        let browser = self.launch_inner(session).await?;
        Ok(Arc::new(browser))
    }
}

pub struct ChromeBrowser {
    session: String,
    debug_port: u16,
    pid: Option<u32>,
    /// Browser-level connection, used for target management.
    cdp: Arc<CdpClient>,
    child: Mutex<Option<Child>>,
    user_agent: String,
    navigation_timeout: Duration,
}

impl ChromeBrowser {
    /// Attaches to a fresh target, applies the user agent and loads `url`.
    async fn open_target(&self, target_id: &str, url: &str) -> Result<CdpClient> {
        let ws_url = get_target_ws_url(self.debug_port, target_id).await?;
        let page = CdpClient::connect(&ws_url).await?;

        page.enable_domain("Page").await?;
        page.enable_domain("Runtime").await?;
        page.enable_domain("Network").await?;
        page.set_user_agent(&self.user_agent).await?;

        debug!(session = %self.session, url, "Navigating new page");
        page.navigate(url).await?;
        self.wait_for_load(&page).await?;
        Ok(page)
    }

    async fn wait_for_load(&self, page: &CdpClient) -> Result<()> {
        let start = Instant::now();
        loop {
            let state = page.evaluate("document.readyState").await.unwrap_or(Value::Null);
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if start.elapsed() > self.navigation_timeout {
                return Err(Error::NotReady(format!(
                    "page did not finish loading within {}s",
                    self.navigation_timeout.as_secs()
                )));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

#[async_trait]
impl BrowserHandle for ChromeBrowser {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn new_page(&self, url: &str) -> Result<Box<dyn Page>> {
        let target_id = self.cdp.create_target("about:blank").await?;
        let page = close_on_error(self.open_target(&target_id, url), async {
            self.cdp.close_target(&target_id).await
        })
        .await?;

        Ok(Box::new(ChromePage::new(page, self.cdp.clone(), target_id)))
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.cdp.send_command("Browser.close", json!({})).await {
            debug!(session = %self.session, error = %e, "Browser.close failed, killing process");
        }
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(session = %self.session, error = %e, "Failed to kill browser process");
            }
        }
        info!(session = %self.session, "Browser closed");
        Ok(())
    }
}

/// Awaits `setup`; if it fails, runs `cleanup` before returning the error.
async fn close_on_error<T, S, C>(setup: S, cleanup: C) -> Result<T>
where
    S: Future<Output = Result<T>>,
    C: Future<Output = Result<()>>,
{
    match setup.await {
        Ok(value) => Ok(value),
        Err(e) => {
            if let Err(cleanup_err) = cleanup.await {
                debug!(error = %cleanup_err, "Cleanup after failed page setup failed");
            }
            Err(e)
        }
    }
}

/// Command line for a CDP-enabled Chromium bound to one profile directory.
fn build_browser_args(config: &BrowserConfig, debug_port: u16, user_data_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--password-store=basic".to_string(),
        format!("--user-agent={}", config.user_agent),
    ];
    args.extend(config.args.iter().cloned());
    if config.headless {
        args.push("--headless=new".to_string());
    }
    args.push("--window-size=1280,900".to_string());
    args.push("about:blank".to_string());
    args
}

/// Find a Chromium-family binary on the system.
pub fn find_browser_binary() -> Option<String> {
    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Launch(format!("Failed to bind to find free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Launch(format!("Failed to get local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Polls /json/version until the browser-level debugger URL shows up.
async fn wait_for_cdp_ready(port: u16, timeout: Duration) -> Result<String> {
    let start = Instant::now();
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Launch(format!(
                "Chrome CDP not ready after {}s on port {}",
                timeout.as_secs(),
                port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve a targetId to its WebSocket debugger URL via /json/list.
async fn get_target_ws_url(port: u16, target_id: &str) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets) = resp.json::<Vec<Value>>().await else {
            continue;
        };

        let found = targets
            .iter()
            .filter(|t| t.get("targetId").and_then(|v| v.as_str()) == Some(target_id))
            .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()));
        if let Some(ws_url) = found {
            return Ok(ws_url.to_string());
        }
    }

    Err(Error::Driver(format!(
        "No WebSocket URL found for targetId '{}' after retries",
        target_id
    )))
}
