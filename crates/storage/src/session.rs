use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};
use wabridge_core::{Paths, Result};

use crate::document;

/// Persisted record of one paired browser session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub pid: u32,
    #[serde(default)]
    pub child_pids: Vec<u32>,
    #[serde(alias = "created")]
    pub created_at: DateTime<Utc>,
}

/// The on-disk token registry (`token -> SessionRecord`).
///
/// Every call re-reads the document so that external edits and other
/// processes are observed; writes within this process are serialized. An
/// unparsable file is reported as an error and never overwritten.
pub struct SessionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(paths: &Paths) -> Self {
        Self::at(paths.token_data_file())
    }

    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Result<BTreeMap<String, SessionRecord>> {
        document::read_strict(&self.path)
    }

    pub fn get(&self, token: &str) -> Result<Option<SessionRecord>> {
        Ok(self.load()?.remove(token))
    }

    pub fn contains(&self, token: &str) -> Result<bool> {
        Ok(self.load()?.contains_key(token))
    }

    pub fn insert(&self, token: &str, record: SessionRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut sessions = self.load()?;
        sessions.insert(token.to_string(), record);
        document::write_pretty(&self.path, &sessions)?;
        debug!(token, "Session record saved");
        Ok(())
    }

    /// Removes the token; returns the removed record, if any.
    pub fn remove(&self, token: &str) -> Result<Option<SessionRecord>> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut sessions = self.load()?;
        let removed = sessions.remove(token);
        if removed.is_some() {
            document::write_pretty(&self.path, &sessions)?;
            info!(token, "Token removed");
        }
        Ok(removed)
    }
}
