//! Volatile per-chat record of message bodies already returned to callers.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Outcome of merging a fresh scrape into a chat's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryUpdate {
    /// Bodies not seen before, in scrape order. Already appended.
    New(Vec<String>),
    /// The chat has history and the scrape added nothing to it.
    NothingNew,
    /// No history exists for the chat and the scrape was empty.
    NoHistory,
}

/// Bounded, ordered message history keyed by chat id. Oldest entries are
/// evicted first once `cap` is exceeded. Never persisted.
pub struct ChatHistory {
    cap: usize,
    chats: Mutex<HashMap<String, VecDeque<String>>>,
}

impl ChatHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            chats: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, chat_id: &str, scraped: Vec<String>) -> HistoryUpdate {
        let mut chats = self.chats.lock().unwrap_or_else(|e| e.into_inner());
        let existing = chats.get(chat_id);

        let mut fresh: Vec<String> = Vec::new();
        for body in scraped {
            let seen = existing.map(|h| h.contains(&body)).unwrap_or(false);
            if !seen && !fresh.contains(&body) {
                fresh.push(body);
            }
        }

        if fresh.is_empty() {
            return if existing.is_some() {
                HistoryUpdate::NothingNew
            } else {
                HistoryUpdate::NoHistory
            };
        }

        let history = chats.entry(chat_id.to_string()).or_default();
        for body in &fresh {
            history.push_back(body.clone());
        }
        while history.len() > self.cap {
            history.pop_front();
        }
        HistoryUpdate::New(fresh)
    }
}
