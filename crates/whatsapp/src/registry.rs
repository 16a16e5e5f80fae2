//! One browser per token, mirrored into the persisted token registry.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};
use wabridge_browser::{BrowserDriver, BrowserHandle, ProcessControl, Signal};
use wabridge_core::{Error, Result};
use wabridge_storage::{SessionRecord, SessionStore};

/// Filled once the browser for a token is up; empty while it launches.
type Slot = Arc<OnceCell<Arc<dyn BrowserHandle>>>;

pub struct SessionRegistry {
    driver: Arc<dyn BrowserDriver>,
    processes: Arc<dyn ProcessControl>,
    store: SessionStore,
    /// At most one slot per token. The map lock is never held across a launch.
    handles: Mutex<HashMap<String, Slot>>,
}

impl SessionRegistry {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        processes: Arc<dyn ProcessControl>,
        store: SessionStore,
    ) -> Self {
        Self {
            driver,
            processes,
            store,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the live browser for `token`, launching and recording one if
    /// none exists. Concurrent calls for one token share a single launch.
    pub async fn create(&self, token: &str) -> Result<Arc<dyn BrowserHandle>> {
        let slot = self
            .handles
            .lock()
            .await
            .entry(token.to_string())
            .or_default()
            .clone();

        match slot.get_or_try_init(|| self.launch(token)).await {
            Ok(handle) => {
                let handle = handle.clone();
                if self.holds(token, &slot).await {
                    Ok(handle)
                } else {
                    warn!(token, "Terminated while the browser was starting");
                    if let Err(e) = handle.close().await {
                        debug!(token, error = %e, "Close of late browser failed");
                    }
                    self.store.remove(token)?;
                    Err(Error::Auth("session terminated during launch".to_string()))
                }
            }
            Err(e) => {
                self.release_empty(token, &slot).await;
                Err(e)
            }
        }
    }

    async fn launch(&self, token: &str) -> Result<Arc<dyn BrowserHandle>> {
        let handle = self.driver.launch(token).await?;
        let pid = handle.pid().unwrap_or(0);
        let child_pids = if pid != 0 {
            self.processes.child_pids(pid).await
        } else {
            Vec::new()
        };
        info!(token, pid, child_pids = ?child_pids, "Browser initialized");

        let record = SessionRecord {
            pid,
            child_pids,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert(token, record) {
            if let Err(close_err) = handle.close().await {
                debug!(token, error = %close_err, "Close after failed record failed");
            }
            return Err(e);
        }
        Ok(handle)
    }

    async fn holds(&self, token: &str, slot: &Slot) -> bool {
        self.handles
            .lock()
            .await
            .get(token)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Drops a slot whose launch failed, unless another caller replaced it.
    async fn release_empty(&self, token: &str, slot: &Slot) {
        let mut handles = self.handles.lock().await;
        let ours = handles
            .get(token)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && current.get().is_none());
        if ours {
            handles.remove(token);
        }
    }

    async fn take_handle(&self, token: &str) -> Option<Arc<dyn BrowserHandle>> {
        self.handles
            .lock()
            .await
            .remove(token)
            .and_then(|slot| slot.get().cloned())
    }

    pub fn is_registered(&self, token: &str) -> Result<bool> {
        self.store.contains(token)
    }

    pub fn records(&self) -> Result<BTreeMap<String, SessionRecord>> {
        self.store.load()
    }

    /// The authorization gate for every token-scoped operation. Unknown
    /// tokens fail with `Auth` before the browser is touched. A recorded token
    /// whose browser is gone is torn down and reported the same way.
    pub async fn session(&self, token: &str) -> Result<Arc<dyn BrowserHandle>> {
        let Some(record) = self.store.get(token)? else {
            return Err(Error::Auth("Invalid token".to_string()));
        };

        let slot = self.handles.lock().await.get(token).cloned();
        if let Some(slot) = slot {
            return match slot.get() {
                Some(handle) => Ok(handle.clone()),
                None => Err(Error::NotReady("browser is still starting".to_string())),
            };
        }

        warn!(token, pid = record.pid, "Registry entry has no live browser, purging");
        self.force_terminate(record.pid, token).await?;
        Err(Error::Auth("session is no longer active".to_string()))
    }

    /// Closes the browser and forgets the token. Absent tokens are a no-op;
    /// an entry with no live handle is force-terminated by pid.
    pub async fn terminate(&self, token: &str) -> Result<()> {
        match self.take_handle(token).await {
            Some(handle) => {
                if let Err(e) = handle.close().await {
                    warn!(token, error = %e, "Graceful browser close failed");
                }
                self.store.remove(token)?;
                info!(token, "Browser closed for token");
                Ok(())
            }
            None => match self.store.get(token)? {
                Some(record) => self.force_terminate(record.pid, token).await,
                None => {
                    debug!(token, "Terminate on unknown token");
                    Ok(())
                }
            },
        }
    }

    /// Signals `pid` (terminate, escalating to kill if the first signal
    /// errors), then unconditionally drops the handle and the persisted entry.
    pub async fn force_terminate(&self, pid: u32, token: &str) -> Result<()> {
        if pid != 0 && self.processes.is_alive(pid) {
            match self.processes.signal(pid, Signal::Terminate).await {
                Ok(()) => info!(pid, "SIGTERM sent"),
                Err(e) => {
                    warn!(pid, error = %e, "SIGTERM failed, trying SIGKILL");
                    if let Err(e) = self.processes.signal(pid, Signal::Kill).await {
                        warn!(pid, error = %e, "SIGKILL failed");
                    }
                }
            }
        }

        if let Some(handle) = self.take_handle(token).await {
            if let Err(e) = handle.close().await {
                debug!(token, error = %e, "Close after signal failed");
            }
        }
        self.store.remove(token)?;
        Ok(())
    }

    /// Terminates every session with a live browser. Used on shutdown.
    pub async fn close_all(&self) -> Result<usize> {
        let tokens: Vec<String> = self
            .handles
            .lock()
            .await
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(token, _)| token.clone())
            .collect();
        for token in &tokens {
            self.terminate(token).await?;
        }
        Ok(tokens.len())
    }

    /// Drops persisted entries whose browser process has died. Returns the
    /// purged tokens.
    pub async fn reconcile(&self) -> Result<Vec<String>> {
        let records = self.store.load()?;
        let live: Vec<String> = self.handles.lock().await.keys().cloned().collect();

        let mut purged = Vec::new();
        for (token, record) in records {
            if live.contains(&token) || self.processes.is_alive(record.pid) {
                continue;
            }
            self.store.remove(&token)?;
            info!(token = %token, pid = record.pid, "Purged session with dead browser");
            purged.push(token);
        }
        Ok(purged)
    }
}
