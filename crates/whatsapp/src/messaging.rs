//! Send, receive, contact resolution and recent-chat listing, each on its own
//! page of the session's browser.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use wabridge_browser::{Page, WaitOptions};
use wabridge_core::{
    normalize_name, Error, Locators, PhonePattern, Result, RetryError, RetryPolicy,
    WhatsAppConfig,
};
use wabridge_storage::{ChatHistory, HistoryUpdate, IndexStore};

use crate::registry::SessionRegistry;
use crate::scripts;

pub const MAPPING_ALERT: &str = "Please use the /mapping route to map the new contact";

/// Outcome of looking a contact up by display name. `NotFound` is an
/// expected result (names the search cannot match, usually emoji-bearing),
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactResolution {
    Found(String),
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentChat {
    pub chat_id: String,
    pub last_message_time: String,
    pub last_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrapedChat {
    chat_name: String,
    #[serde(default)]
    last_message_time: String,
    #[serde(default)]
    last_message: String,
}

pub struct Messenger {
    registry: Arc<SessionRegistry>,
    config: Arc<WhatsAppConfig>,
    index: IndexStore,
    history: ChatHistory,
    phone: PhonePattern,
    /// Normalized names with a background resolution in flight.
    resolving: Mutex<HashSet<String>>,
}

impl Messenger {
    pub fn new(
        registry: Arc<SessionRegistry>,
        config: Arc<WhatsAppConfig>,
        index: IndexStore,
    ) -> Result<Self> {
        let phone = PhonePattern::new(&config.phone_pattern)?;
        let history = ChatHistory::new(config.timings.history_cap);
        Ok(Self {
            registry,
            config,
            index,
            history,
            phone,
            resolving: Mutex::new(HashSet::new()),
        })
    }

    fn retry_policy(&self) -> RetryPolicy {
        let t = &self.config.timings;
        RetryPolicy::new(t.retry_attempts, t.retry_delay())
    }

    pub async fn send_message(&self, token: &str, chat_id: &str, text: &str) -> Result<()> {
        let browser = self.registry.session(token).await?;
        let page = browser
            .new_page(&self.config.chat_url(chat_id, Some(text)))
            .await?;

        let target: &dyn Page = page.as_ref();
        let send_button = self.config.locators.send_button.as_str();
        let result = self
            .retry_policy()
            .run("send_message", Error::is_transient, move |attempt| {
                debug!(chat_id, attempt = attempt + 1, "Clicking send");
                target.click(send_button)
            })
            .await;

        if result.is_ok() {
            tokio::time::sleep(self.config.timings.send_settle()).await;
        }
        close_page(page.as_ref()).await;

        match result {
            Ok(()) => {
                info!(chat_id, "Message sent successfully");
                Ok(())
            }
            Err(RetryError::Exhausted { attempts, last }) => Err(Error::SendFailed {
                attempts,
                reason: last.to_string(),
            }),
            Err(RetryError::Aborted(e)) => Err(e),
        }
    }

    /// Inbound messages not returned before for this chat, oldest first as
    /// rendered on the page. Batches are never reversed, so consecutive
    /// calls read as one arrival-ordered stream.
    pub async fn receive_messages(
        &self,
        token: &str,
        chat_id: &str,
        visible_name: &str,
    ) -> Result<Vec<String>> {
        let browser = self.registry.session(token).await?;
        let page = browser.new_page(&self.config.chat_url(chat_id, None)).await?;

        let target: &dyn Page = page.as_ref();
        let config: &WhatsAppConfig = &self.config;
        let history = &self.history;
        let result = self
            .retry_policy()
            .run("receive_messages", Error::is_transient, move |_attempt| {
                receive_attempt(target, config, history, chat_id, visible_name)
            })
            .await;

        close_page(page.as_ref()).await;

        match result {
            Ok(messages) => {
                info!(chat_id, count = messages.len(), "Messages retrieved");
                Ok(messages)
            }
            Err(RetryError::Exhausted { attempts, last }) => Err(Error::ChatNotReady {
                attempts,
                reason: last.to_string(),
            }),
            Err(RetryError::Aborted(e)) => Err(e),
        }
    }

    /// Looks the contact up and records a hit in the contact index.
    pub async fn resolve_contact(&self, token: &str, contact_name: &str) -> Result<ContactResolution> {
        let resolution = self.lookup_contact(token, contact_name).await?;
        if let ContactResolution::Found(ref chat_id) = resolution {
            self.index.insert_contact_id(contact_name, chat_id)?;
        }
        Ok(resolution)
    }

    /// Looks the contact up without touching the index.
    pub(crate) async fn lookup_contact(
        &self,
        token: &str,
        contact_name: &str,
    ) -> Result<ContactResolution> {
        let browser = self.registry.session(token).await?;
        let page = browser.new_page(&self.config.base_url).await?;
        let result = self.lookup_on_page(page.as_ref(), contact_name).await;
        close_page(page.as_ref()).await;
        result
    }

    async fn lookup_on_page(&self, page: &dyn Page, contact_name: &str) -> Result<ContactResolution> {
        let locators = &self.config.locators;
        let timings = &self.config.timings;
        let wait = WaitOptions::present(timings.selector_timeout());

        tokio::time::sleep(timings.page_settle()).await;
        page.wait_for_selector(&locators.new_chat_button, wait).await?;
        page.click(&locators.new_chat_button).await?;
        page.wait_for_selector(&locators.contact_search_box, wait).await?;
        page.type_text(&locators.contact_search_box, contact_name).await?;

        // Exact title first, then the trailing-space rendering.
        let picked = RetryPolicy::new(2, Duration::ZERO)
            .run("select_contact", Error::is_transient, move |variant| {
                select_contact(page, locators, contact_name, variant, wait)
            })
            .await;
        match picked {
            Ok(()) => {}
            Err(RetryError::Exhausted { .. }) => {
                warn!(
                    contact = contact_name,
                    "Could not select contact, the name may contain emoji"
                );
                return Ok(ContactResolution::NotFound);
            }
            Err(RetryError::Aborted(e)) => return Err(e),
        }

        page.wait_for_selector(&locators.contact_composer, wait).await?;
        page.hover(&locators.contact_composer).await?;
        page.click(&locators.contact_composer).await?;

        self.open_contact_info(page).await?;
        tokio::time::sleep(timings.menu_settle()).await;

        let phone = page
            .evaluate(
                scripts::SCRAPE_PHONE,
                vec![
                    json!(locators.contact_phone_primary),
                    json!(locators.contact_phone_candidates),
                    json!(self.config.phone_marker),
                ],
            )
            .await?;
        match phone.as_str().map(str::trim).filter(|p| !p.is_empty()) {
            Some(phone) => {
                info!(contact = contact_name, "Phone number successfully found");
                Ok(ContactResolution::Found(phone.to_string()))
            }
            None => {
                warn!(contact = contact_name, "Contact info shows no phone number");
                Ok(ContactResolution::NotFound)
            }
        }
    }

    async fn open_contact_info(&self, page: &dyn Page) -> Result<()> {
        let locators = &self.config.locators;
        let opened = page
            .evaluate(
                scripts::OPEN_MENU,
                vec![json!(locators.menu_icon), json!(locators.menu_icon_index)],
            )
            .await?;
        if opened != Value::Bool(true) {
            return Err(Error::NotReady("conversation menu icon not found".to_string()));
        }
        tokio::time::sleep(self.config.timings.menu_settle()).await;

        let clicked = page
            .evaluate(
                scripts::CLICK_LABELED,
                vec![json!(locators.menu_button), json!(locators.contact_info_label)],
            )
            .await?;
        if clicked != Value::Bool(true) {
            return Err(Error::NotReady(format!(
                "\"{}\" button not found",
                locators.contact_info_label
            )));
        }
        Ok(())
    }

    /// Chats whose last message is inbound, up to `max_count`, each with the
    /// best chat id available. Unmapped contacts are returned with an alert
    /// and resolved in the background.
    pub async fn list_recent_chats(
        self: &Arc<Self>,
        token: &str,
        max_count: usize,
    ) -> Result<Vec<RecentChat>> {
        let browser = self.registry.session(token).await?;
        let page = browser.new_page(&self.config.base_url).await?;
        let scraped = self.scrape_chats(page.as_ref(), max_count).await;
        close_page(page.as_ref()).await;
        let mut scraped = scraped?;
        scraped.truncate(max_count);

        let contact_ids = self.index.contact_ids()?;
        let groups = self.index.group_names()?;

        let mut chats = Vec::with_capacity(scraped.len());
        for chat in scraped {
            let key = normalize_name(&chat.chat_name);
            let (chat_id, alert) = if self.phone.is_match(chat.chat_name.trim()) {
                (chat.chat_name.trim().to_string(), None)
            } else if let Some(id) = contact_ids.get(&key) {
                (id.clone(), None)
            } else if groups.contains(&key) {
                debug!(chat = %chat.chat_name, "That's a group, skipping");
                continue;
            } else {
                self.spawn_resolution(token, &chat.chat_name);
                (chat.chat_name.clone(), Some(MAPPING_ALERT.to_string()))
            };
            chats.push(RecentChat {
                chat_id,
                last_message_time: chat.last_message_time,
                last_message: chat.last_message,
                alert_message: alert,
            });
        }
        Ok(chats)
    }

    async fn scrape_chats(&self, page: &dyn Page, max_count: usize) -> Result<Vec<ScrapedChat>> {
        let locators = &self.config.locators;
        let timings = &self.config.timings;

        tokio::time::sleep(timings.page_settle()).await;
        if let Err(e) = page
            .wait_for_selector(&locators.chat_row, WaitOptions::present(timings.selector_timeout()))
            .await
        {
            debug!(error = %e, "No chat rows rendered");
        }

        let raw = page
            .evaluate(
                scripts::LIST_CHATS,
                vec![
                    json!(locators.chat_row),
                    json!(locators.chat_name),
                    json!(locators.chat_last_message_time),
                    json!(locators.chat_last_message),
                    json!(locators.chat_receipt_icons),
                    json!(max_count),
                ],
            )
            .await?;
        if raw.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(raw)
            .map_err(|e| Error::Driver(format!("Unexpected chat list shape: {}", e)))
    }

    /// Fire-and-forget resolution of an unmapped chat name. Failures are
    /// logged only; one resolution per name at a time.
    fn spawn_resolution(self: &Arc<Self>, token: &str, chat_name: &str) {
        let key = normalize_name(chat_name);
        {
            let mut resolving = self.resolving.lock().unwrap_or_else(|e| e.into_inner());
            if !resolving.insert(key.clone()) {
                debug!(chat = chat_name, "Resolution already in flight");
                return;
            }
        }

        let this = Arc::clone(self);
        let token = token.to_string();
        let name = chat_name.to_string();
        tokio::spawn(async move {
            match this.resolve_contact(&token, &name).await {
                Ok(ContactResolution::Found(id)) => {
                    info!(chat = %name, chat_id = %id, "Background contact resolution stored")
                }
                Ok(ContactResolution::NotFound) => {
                    warn!(chat = %name, "Background contact resolution found nothing")
                }
                Err(e) => warn!(chat = %name, error = %e, "Background contact resolution failed"),
            }
            this.resolving
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
        });
    }
}

/// One readiness-scrape-dedup pass over an open chat.
async fn receive_attempt(
    page: &dyn Page,
    config: &WhatsAppConfig,
    history: &ChatHistory,
    chat_id: &str,
    visible_name: &str,
) -> Result<Vec<String>> {
    let locators = &config.locators;
    page.wait_for_selector(
        &locators.message_composer,
        WaitOptions::visible(config.timings.selector_timeout()),
    )
    .await?;
    tokio::time::sleep(config.timings.receive_settle()).await;

    let scraped = page
        .evaluate(
            scripts::COLLECT_MESSAGES,
            vec![
                json!(locators.message_body),
                json!(locators.message_meta_attribute),
                json!(visible_name),
            ],
        )
        .await?;
    match history.record(chat_id, string_list(scraped)) {
        HistoryUpdate::New(fresh) => Ok(fresh),
        HistoryUpdate::NothingNew => {
            debug!(chat_id, "No new messages");
            Ok(Vec::new())
        }
        HistoryUpdate::NoHistory => Err(Error::NotReady("No messages found".to_string())),
    }
}

/// Picks the search result titled `contact_name`; `variant` selects the
/// title rendering to match.
async fn select_contact(
    page: &dyn Page,
    locators: &Locators,
    contact_name: &str,
    variant: u32,
    wait: WaitOptions,
) -> Result<()> {
    let selector = locators.contact_title(contact_name, variant);
    page.wait_for_selector(&selector, wait).await?;
    page.hover(&selector).await?;
    page.click(&selector).await
}

pub(crate) async fn close_page(page: &dyn Page) {
    if let Err(e) = page.close().await {
        debug!(error = %e, "Page close failed");
    }
}

fn string_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
