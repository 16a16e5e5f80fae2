use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use wabridge_browser::{BrowserDriver, ProcessControl};
use wabridge_core::{Error, Paths, Result, WhatsAppConfig};
use wabridge_storage::{IndexStore, SessionRecord, SessionStore};

use crate::mapping::Mapper;
use crate::messaging::{ContactResolution, Messenger, RecentChat};
use crate::pairing::{Pairing, PairingCoordinator};
use crate::registry::SessionRegistry;

/// Entry point for every session-scoped operation: input validation first,
/// then token authorization, then the browser.
pub struct WhatsAppService {
    registry: Arc<SessionRegistry>,
    pairing: PairingCoordinator,
    messenger: Arc<Messenger>,
    mapper: Mapper,
}

impl WhatsAppService {
    pub fn new(
        config: WhatsAppConfig,
        paths: &Paths,
        driver: Arc<dyn BrowserDriver>,
        processes: Arc<dyn ProcessControl>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let registry = Arc::new(SessionRegistry::new(
            driver,
            processes,
            SessionStore::new(paths),
        ));
        let index = IndexStore::new(paths);
        let messenger = Arc::new(Messenger::new(
            registry.clone(),
            config.clone(),
            index.clone(),
        )?);
        Ok(Self {
            pairing: PairingCoordinator::new(registry.clone(), config.clone()),
            mapper: Mapper::new(registry.clone(), config, index, messenger.clone()),
            registry,
            messenger,
        })
    }

    /// Purges persisted sessions whose browser died while we were down.
    pub async fn restore(&self) -> Result<usize> {
        let purged = self.registry.reconcile().await?;
        let remaining = self.registry.records()?.len();
        info!(purged = purged.len(), remaining, "Session registry restored");
        Ok(purged.len())
    }

    /// Closes every live browser and forgets its token.
    pub async fn shutdown(&self) -> Result<()> {
        let closed = self.registry.close_all().await?;
        info!(closed, "All browser sessions closed");
        Ok(())
    }

    pub fn sessions(&self) -> Result<BTreeMap<String, SessionRecord>> {
        self.registry.records()
    }

    pub async fn issue_pairing(&self) -> Result<Pairing> {
        self.pairing.issue().await
    }

    pub async fn terminate(&self, token: &str) -> Result<()> {
        require("token", token)?;
        self.authorize(token)?;
        self.registry.terminate(token).await
    }

    pub async fn resolve_contact(&self, token: &str, contact_name: &str) -> Result<ContactResolution> {
        require("token", token)?;
        require("contactName", contact_name)?;
        self.messenger.resolve_contact(token, contact_name).await
    }

    pub async fn list_recent_chats(&self, token: &str, total_chats: usize) -> Result<Vec<RecentChat>> {
        require("token", token)?;
        if total_chats == 0 {
            return Err(Error::Validation("totalChats is required".to_string()));
        }
        self.messenger.list_recent_chats(token, total_chats).await
    }

    pub async fn send_message(&self, token: &str, chat_id: &str, message: &str) -> Result<()> {
        require("token", token)?;
        require("chatId", chat_id)?;
        require("message", message)?;
        self.messenger.send_message(token, chat_id, message).await
    }

    pub async fn receive_messages(
        &self,
        token: &str,
        chat_id: &str,
        visible_name: &str,
    ) -> Result<Vec<String>> {
        require("token", token)?;
        require("chatId", chat_id)?;
        require("visibleName", visible_name)?;
        self.messenger.receive_messages(token, chat_id, visible_name).await
    }

    pub async fn run_mapping(&self, token: &str) -> Result<()> {
        require("token", token)?;
        self.mapper.run_mapping(token).await
    }

    fn authorize(&self, token: &str) -> Result<()> {
        if self.registry.is_registered(token)? {
            Ok(())
        } else {
            Err(Error::Auth("Invalid token".to_string()))
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::Validation(format!("{} is required", field)))
    } else {
        Ok(())
    }
}
