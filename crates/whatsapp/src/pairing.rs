//! QR pairing: issue a code for a fresh session, then race scan detection
//! against a deadline.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wabridge_browser::{Page, WaitOptions};
use wabridge_core::{Result, WhatsAppConfig};

use crate::messaging::close_page;
use crate::registry::SessionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingOutcome {
    /// The code disappeared; the session stays alive.
    Scanned,
    /// No scan before the deadline; the session was terminated.
    TimedOut,
}

pub struct Pairing {
    pub token: String,
    /// PNG capture of the pairing code.
    pub image: Vec<u8>,
    pub monitor: JoinHandle<PairingOutcome>,
}

pub struct PairingCoordinator {
    registry: Arc<SessionRegistry>,
    config: Arc<WhatsAppConfig>,
}

impl PairingCoordinator {
    pub fn new(registry: Arc<SessionRegistry>, config: Arc<WhatsAppConfig>) -> Self {
        Self { registry, config }
    }

    /// Mints a token, opens the client root in a new session and captures
    /// the pairing code. The scan monitor is already running on return.
    pub async fn issue(&self) -> Result<Pairing> {
        let token = Uuid::new_v4().simple().to_string();
        let browser = self.registry.create(&token).await?;

        let page = match browser.new_page(&self.config.base_url).await {
            Ok(page) => page,
            Err(e) => {
                self.abandon(&token).await;
                return Err(e);
            }
        };

        let image = match self.capture(page.as_ref()).await {
            Ok(image) => image,
            Err(e) => {
                close_page(page.as_ref()).await;
                self.abandon(&token).await;
                return Err(e);
            }
        };

        let timings = &self.config.timings;
        let monitor = tokio::spawn(monitor(
            self.registry.clone(),
            page,
            token.clone(),
            self.config.locators.qr_code.clone(),
            timings.pairing_poll(),
            timings.pairing_timeout(),
        ));

        info!(token = %token, "QR code issued, waiting for scan");
        Ok(Pairing {
            token,
            image,
            monitor,
        })
    }

    async fn capture(&self, page: &dyn Page) -> Result<Vec<u8>> {
        let qr = &self.config.locators.qr_code;
        page.wait_for_selector(qr, WaitOptions::visible(self.config.timings.qr_timeout()))
            .await?;
        page.screenshot(qr).await
    }

    async fn abandon(&self, token: &str) {
        if let Err(e) = self.registry.terminate(token).await {
            warn!(token, error = %e, "Failed to discard unpaired session");
        }
    }
}

/// Exactly one of scan detection and the deadline wins; the other is
/// dropped before the page is touched again.
async fn monitor(
    registry: Arc<SessionRegistry>,
    page: Box<dyn Page>,
    token: String,
    qr_selector: String,
    poll: Duration,
    deadline: Duration,
) -> PairingOutcome {
    let outcome = tokio::select! {
        _ = wait_for_scan(page.as_ref(), &qr_selector, poll) => PairingOutcome::Scanned,
        _ = tokio::time::sleep(deadline) => PairingOutcome::TimedOut,
    };

    match outcome {
        PairingOutcome::Scanned => {
            info!(token = %token, "QR code has been scanned");
            close_page(page.as_ref()).await;
        }
        PairingOutcome::TimedOut => {
            warn!(token = %token, secs = deadline.as_secs(), "Scan time exceeded, terminating session");
            close_page(page.as_ref()).await;
            if let Err(e) = registry.terminate(&token).await {
                warn!(token = %token, error = %e, "Failed to terminate unpaired session");
            }
        }
    }
    outcome
}

/// Resolves once the pairing code is gone from the page.
async fn wait_for_scan(page: &dyn Page, qr_selector: &str, poll: Duration) {
    let mut ticker = tokio::time::interval(poll.max(Duration::from_millis(1)));
    // The first tick is immediate; the code was just captured.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match page.exists(qr_selector).await {
            Ok(false) => return,
            Ok(true) => debug!("Waiting for QR code to be scanned"),
            Err(e) => debug!(error = %e, "QR probe failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use wabridge_storage::SessionStore;

    fn coordinator(h: &Harness) -> (PairingCoordinator, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new(
            h.driver(),
            h.process_control(),
            SessionStore::new(&h.paths),
        ));
        let coordinator = PairingCoordinator::new(registry.clone(), Arc::new(h.config.clone()));
        (coordinator, registry)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_keeps_session() {
        let h = Harness::new();
        let qr = h.config.locators.qr_code.clone();
        // Present for two polls, gone on the third.
        h.fake.state().vanish_after.insert(qr, 2);
        let (coordinator, registry) = coordinator(&h);

        let start = tokio::time::Instant::now();
        let pairing = coordinator.issue().await.unwrap();
        assert_eq!(pairing.token.len(), 32);
        assert!(!pairing.image.is_empty());

        let outcome = pairing.monitor.await.unwrap();
        assert_eq!(outcome, PairingOutcome::Scanned);
        assert_eq!(start.elapsed(), Duration::from_secs(30));

        assert!(registry.is_registered(&pairing.token).unwrap());
        let state = h.fake.state();
        assert_eq!(state.pages_closed, 1);
        assert_eq!(state.browsers_closed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_terminates_session() {
        let h = Harness::new();
        let (coordinator, registry) = coordinator(&h);

        let start = tokio::time::Instant::now();
        let pairing = coordinator.issue().await.unwrap();
        assert!(registry.is_registered(&pairing.token).unwrap());

        let outcome = pairing.monitor.await.unwrap();
        assert_eq!(outcome, PairingOutcome::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(120));

        assert!(!registry.is_registered(&pairing.token).unwrap());
        let state = h.fake.state();
        assert_eq!(state.browsers_closed, 1);
        assert_eq!(state.pages_closed, 1);
    }

    #[tokio::test]
    async fn test_missing_code_discards_session() {
        let h = Harness::new();
        let qr = h.config.locators.qr_code.clone();
        h.fake.state().missing.insert(qr);
        let (coordinator, registry) = coordinator(&h);

        assert!(coordinator.issue().await.is_err());
        assert!(registry.records().unwrap().is_empty());
        let state = h.fake.state();
        assert_eq!(state.browsers_closed, 1);
        assert_eq!(state.pages_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_close_failure_still_terminates_on_timeout() {
        let h = Harness::new();
        h.fake.state().page_close_fails = true;
        let (coordinator, registry) = coordinator(&h);

        let pairing = coordinator.issue().await.unwrap();
        let outcome = pairing.monitor.await.unwrap();

        assert_eq!(outcome, PairingOutcome::TimedOut);
        assert!(!registry.is_registered(&pairing.token).unwrap());
        assert_eq!(h.fake.state().browsers_closed, 1);
    }
}
