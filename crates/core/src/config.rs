use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub basic_auth: BasicAuthConfig,
}

fn default_gateway_host() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    5000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            basic_auth: BasicAuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Explicit browser binary; auto-detected when unset.
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_browser_args")]
    pub args: Vec<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_launch_timeout_secs")]
    pub launch_timeout_secs: u64,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
}

fn default_headless() -> bool {
    true
}

fn default_browser_args() -> Vec<String> {
    vec![
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--lang=en-US".to_string(),
    ]
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.132 Safari/537.36".to_string()
}

fn default_launch_timeout_secs() -> u64 {
    15
}

fn default_navigation_timeout_secs() -> u64 {
    60
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: default_headless(),
            args: default_browser_args(),
            user_agent: default_user_agent(),
            launch_timeout_secs: default_launch_timeout_secs(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
        }
    }
}

/// Every UI interaction point used against the web client.
///
/// Operations receive this record instead of embedding selectors, so the
/// control flow never depends on a concrete DOM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Locators {
    pub qr_code: String,
    pub new_chat_button: String,
    pub contact_search_box: String,
    /// Composer used after picking a contact from the search results.
    pub contact_composer: String,
    pub contact_phone_primary: String,
    pub contact_phone_candidates: String,
    /// Overflow menu icons; the conversation menu is the second match.
    pub menu_icon: String,
    pub menu_icon_index: usize,
    pub menu_button: String,
    pub contact_info_label: String,
    pub chat_row: String,
    pub chat_name: String,
    pub chat_last_message_time: String,
    pub chat_last_message: String,
    pub chat_receipt_icons: Vec<String>,
    pub send_button: String,
    /// Composer whose readiness signals a loaded conversation.
    pub message_composer: String,
    pub message_body: String,
    pub message_meta_attribute: String,
    pub list_filter: String,
    pub list_filter_groups: String,
    pub list_filter_contacts: String,
    pub list_container: String,
    pub list_item_name: String,
}

impl Default for Locators {
    fn default() -> Self {
        Self {
            qr_code: r#"canvas[aria-label="Scan me!"]"#.to_string(),
            new_chat_button: r#"span[data-icon="new-chat-outline"]"#.to_string(),
            contact_search_box: "p.selectable-text.copyable-text.iq0m558w.g0rxnol2".to_string(),
            contact_composer: r#"div[contenteditable="true"][title="Type a message"]"#.to_string(),
            contact_phone_primary: "div.a4ywakfo.qt60bha0 span._11JPr.selectable-text.copyable-text span.enbbiyaj.e1gr2w1z.hp667wtd".to_string(),
            contact_phone_candidates: "span[aria-label], span.selectable-text.copyable-text".to_string(),
            menu_icon: r#"span[data-icon="menu"]"#.to_string(),
            menu_icon_index: 1,
            menu_button: r#"div[role="button"]"#.to_string(),
            contact_info_label: "Contact info".to_string(),
            chat_row: r#"[role="row"]"#.to_string(),
            chat_name: r#"[dir="auto"]._11JPr"#.to_string(),
            chat_last_message_time: ".aprpv14t".to_string(),
            chat_last_message: r#"[dir="ltr"]._11JPr"#.to_string(),
            chat_receipt_icons: vec![
                r#"[data-icon="status-check"]"#.to_string(),
                r#"[data-icon="status-dblcheck"]"#.to_string(),
            ],
            send_button: r#"span[data-icon="send"]"#.to_string(),
            message_composer: r#"div[contenteditable="true"][role="textbox"][title="Type a message"]"#.to_string(),
            message_body: "div.copyable-text".to_string(),
            message_meta_attribute: "data-pre-plain-text".to_string(),
            list_filter: r#"span[data-icon="filter"]"#.to_string(),
            list_filter_groups: r#"span[data-icon="group"]"#.to_string(),
            list_filter_contacts: r#"span[data-icon="contacts"]"#.to_string(),
            list_container: "#pane-side".to_string(),
            list_item_name: r#"div[role="row"] div._21S-L span[dir="auto"]"#.to_string(),
        }
    }
}

impl Locators {
    /// Search-result entry for a contact title. `variant` 0 is the exact
    /// title, 1 the trailing-space rendering.
    pub fn contact_title(&self, contact_name: &str, variant: u32) -> String {
        let escaped = contact_name.replace('\\', "\\\\").replace('"', "\\\"");
        if variant == 0 {
            format!(r#"span[title="{}"]"#, escaped)
        } else {
            format!(r#"span[title="{} "]"#, escaped)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timings {
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub send_settle_secs: u64,
    pub receive_settle_secs: u64,
    pub page_settle_secs: u64,
    pub mapping_settle_secs: u64,
    pub filter_settle_secs: u64,
    pub menu_settle_secs: u64,
    pub selector_timeout_secs: u64,
    pub qr_timeout_secs: u64,
    pub pairing_poll_secs: u64,
    pub pairing_timeout_secs: u64,
    pub scroll_step_px: u32,
    pub scroll_interval_ms: u64,
    pub history_cap: usize,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            retry_attempts: 12,
            retry_delay_secs: 15,
            send_settle_secs: 5,
            receive_settle_secs: 5,
            page_settle_secs: 15,
            mapping_settle_secs: 10,
            filter_settle_secs: 2,
            menu_settle_secs: 2,
            selector_timeout_secs: 30,
            qr_timeout_secs: 60,
            pairing_poll_secs: 10,
            pairing_timeout_secs: 120,
            scroll_step_px: 100,
            scroll_interval_ms: 100,
            history_cap: 30,
        }
    }
}

impl Timings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn send_settle(&self) -> Duration {
        Duration::from_secs(self.send_settle_secs)
    }

    pub fn receive_settle(&self) -> Duration {
        Duration::from_secs(self.receive_settle_secs)
    }

    pub fn page_settle(&self) -> Duration {
        Duration::from_secs(self.page_settle_secs)
    }

    pub fn mapping_settle(&self) -> Duration {
        Duration::from_secs(self.mapping_settle_secs)
    }

    pub fn filter_settle(&self) -> Duration {
        Duration::from_secs(self.filter_settle_secs)
    }

    pub fn menu_settle(&self) -> Duration {
        Duration::from_secs(self.menu_settle_secs)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_secs(self.selector_timeout_secs)
    }

    pub fn qr_timeout(&self) -> Duration {
        Duration::from_secs(self.qr_timeout_secs)
    }

    pub fn pairing_poll(&self) -> Duration {
        Duration::from_secs(self.pairing_poll_secs)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }

    /// Zero delays everywhere; used by tests driving a fake page.
    pub fn immediate() -> Self {
        Self {
            retry_delay_secs: 0,
            send_settle_secs: 0,
            receive_settle_secs: 0,
            page_settle_secs: 0,
            mapping_settle_secs: 0,
            filter_settle_secs: 0,
            menu_settle_secs: 0,
            selector_timeout_secs: 0,
            qr_timeout_secs: 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub locators: Locators,
    #[serde(default = "default_phone_pattern")]
    pub phone_pattern: String,
    #[serde(default = "default_phone_marker")]
    pub phone_marker: String,
    #[serde(default)]
    pub timings: Timings,
}

fn default_base_url() -> String {
    "https://web.whatsapp.com".to_string()
}

fn default_phone_pattern() -> String {
    r"^\+55\s\d{2}\s\d{4,5}-\d{4}$".to_string()
}

fn default_phone_marker() -> String {
    "+55".to_string()
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            locators: Locators::default(),
            phone_pattern: default_phone_pattern(),
            phone_marker: default_phone_marker(),
            timings: Timings::default(),
        }
    }
}

impl WhatsAppConfig {
    /// Deep link that opens a conversation, optionally pre-filling the composer.
    pub fn chat_url(&self, chat_id: &str, text: Option<&str>) -> String {
        let base = self.base_url.trim_end_matches('/');
        let phone = urlencoding::encode(chat_id);
        match text {
            Some(text) => format!(
                "{}/send/?phone={}&text={}&type=phone_number&app_absent=0",
                base,
                phone,
                urlencoding::encode(text)
            ),
            None => format!("{}/send/?phone={}&type=phone_number&app_absent=0", base, phone),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Loads the config file if present, then applies environment overrides.
    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            self.gateway.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("PORT is not a valid port: {}", port)))?;
        }
        if let Ok(username) = std::env::var("BASIC_AUTH_USERNAME") {
            self.gateway.basic_auth.username = username;
        }
        if let Ok(password) = std::env::var("BASIC_AUTH_PASSWORD") {
            self.gateway.basic_auth.password = password;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{
            "gateway": { "port": 8080 },
            "whatsapp": { "timings": { "retryAttempts": 3 } }
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.whatsapp.timings.retry_attempts, 3);
        assert_eq!(config.whatsapp.timings.retry_delay_secs, 15);
        assert_eq!(config.whatsapp.timings.history_cap, 30);
        assert_eq!(config.whatsapp.locators.send_button, r#"span[data-icon="send"]"#);
        assert!(config.browser.headless);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.gateway.basic_auth.username = "admin".into();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.gateway.basic_auth.username, "admin");
        assert_eq!(loaded.whatsapp.base_url, "https://web.whatsapp.com");
    }

    #[test]
    fn test_contact_title_variants() {
        let locators = Locators::default();
        assert_eq!(locators.contact_title("Ana", 0), r#"span[title="Ana"]"#);
        assert_eq!(locators.contact_title("Ana", 1), r#"span[title="Ana "]"#);
        assert_eq!(
            locators.contact_title(r#"Dr "J""#, 0),
            r#"span[title="Dr \"J\""]"#
        );
    }

    #[test]
    fn test_chat_url_encodes_text() {
        let config = WhatsAppConfig::default();
        assert_eq!(
            config.chat_url("5511999990000", Some("olá mundo & co")),
            "https://web.whatsapp.com/send/?phone=5511999990000&text=ol%C3%A1%20mundo%20%26%20co&type=phone_number&app_absent=0"
        );
        assert_eq!(
            config.chat_url("5511999990000", None),
            "https://web.whatsapp.com/send/?phone=5511999990000&type=phone_number&app_absent=0"
        );
    }
}
