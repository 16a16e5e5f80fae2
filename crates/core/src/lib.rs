pub mod config;
pub mod error;
pub mod paths;
pub mod retry;
pub mod text;

pub use config::{BrowserConfig, Config, GatewayConfig, Locators, Timings, WhatsAppConfig};
pub use error::{Error, Result};
pub use paths::Paths;
pub use retry::{RetryError, RetryPolicy};
pub use text::{normalize_name, PhonePattern};
