use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Auth(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Send failed after {attempts} attempts: {reason}")]
    SendFailed { attempts: u32, reason: String },

    #[error("Chat not ready after {attempts} attempts: {reason}")]
    ChatNotReady { attempts: u32, reason: String },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// UI-timing failures that a bounded retry may absorb.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NotReady(_) | Error::Driver(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
