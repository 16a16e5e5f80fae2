//! Display-name normalization and phone-id shape matching.

use regex::Regex;

use crate::error::{Error, Result};

/// Emoji blocks stripped from display names before they key an index.
fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F600..=0x1F64F
            | 0x1F300..=0x1F5FF
            | 0x1F680..=0x1F6FF
            | 0x1F700..=0x1F77F
            | 0x1F780..=0x1F7FF
            | 0x1F800..=0x1F8FF
            | 0x1F900..=0x1F9FF
            | 0x1FA00..=0x1FA6F
            | 0x1FA70..=0x1FAFF
            | 0x2600..=0x26FF
            | 0x2700..=0x27BF
    )
}

/// Canonical index key for a display name: emoji removed, whitespace trimmed.
pub fn normalize_name(name: &str) -> String {
    let stripped: String = name.chars().filter(|c| !is_emoji(*c)).collect();
    stripped.trim().to_string()
}

/// Matches display names that are already phone-number-shaped chat ids.
#[derive(Debug, Clone)]
pub struct PhonePattern {
    regex: Regex,
}

impl PhonePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("Invalid phone pattern '{}': {}", pattern, e)))?;
        Ok(Self { regex })
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }
}
