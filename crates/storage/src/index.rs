//! Persisted address-book caches: contact names, contact ids, group names.
//!
//! Writes are read-modify-write without cross-process locking. Concurrent
//! writers resolve as last-write-wins.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;
use wabridge_core::{normalize_name, Paths, Result};

use crate::document;

#[derive(Debug, Clone)]
pub struct IndexStore {
    contact_names_path: PathBuf,
    contact_ids_path: PathBuf,
    group_names_path: PathBuf,
}

impl IndexStore {
    pub fn new(paths: &Paths) -> Self {
        Self {
            contact_names_path: paths.contacts_name_file(),
            contact_ids_path: paths.contacts_data_file(),
            group_names_path: paths.groups_name_file(),
        }
    }

    /// Display names collected from the contacts view, in collection order.
    pub fn contact_names(&self) -> Result<Vec<String>> {
        document::read_or_default(&self.contact_names_path)
    }

    pub fn save_contact_names(&self, names: &[String]) -> Result<()> {
        document::write_pretty(&self.contact_names_path, names)?;
        info!(count = names.len(), "Contact names saved");
        Ok(())
    }

    /// Normalized display name -> phone-shaped chat id.
    pub fn contact_ids(&self) -> Result<BTreeMap<String, String>> {
        document::read_or_default(&self.contact_ids_path)
    }

    pub fn lookup_contact_id(&self, display_name: &str) -> Result<Option<String>> {
        Ok(self.contact_ids()?.remove(&normalize_name(display_name)))
    }

    /// Records one resolved contact and persists the whole index.
    pub fn insert_contact_id(&self, display_name: &str, chat_id: &str) -> Result<()> {
        let mut ids = self.contact_ids()?;
        ids.insert(normalize_name(display_name), chat_id.to_string());
        document::write_pretty(&self.contact_ids_path, &ids)
    }

    /// Normalized names of chats known to be groups.
    pub fn group_names(&self) -> Result<Vec<String>> {
        document::read_or_default(&self.group_names_path)
    }

    /// Replaces the group index wholesale; names are normalized and deduplicated.
    pub fn save_group_names(&self, names: &[String]) -> Result<()> {
        let mut normalized: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            let key = normalize_name(name);
            if !key.is_empty() && !normalized.contains(&key) {
                normalized.push(key);
            }
        }
        document::write_pretty(&self.group_names_path, &normalized)?;
        info!(count = normalized.len(), "Group names saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (IndexStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        (IndexStore::new(&paths), dir)
    }

    #[test]
    fn test_contact_ids_are_keyed_by_normalized_name() {
        let (store, _dir) = store();
        store.insert_contact_id("José 😀", "+55 11 99999-0000").unwrap();

        assert_eq!(
            store.lookup_contact_id("José").unwrap().as_deref(),
            Some("+55 11 99999-0000")
        );
        assert_eq!(
            store.lookup_contact_id("  José 😀 ").unwrap().as_deref(),
            Some("+55 11 99999-0000")
        );
        assert!(store.contact_ids().unwrap().contains_key("José"));
    }

    #[test]
    fn test_group_names_replaced_wholesale() {
        let (store, _dir) = store();
        store
            .save_group_names(&["Família 🏠".to_string(), "Work".to_string(), "Work".to_string()])
            .unwrap();
        assert_eq!(store.group_names().unwrap(), vec!["Família", "Work"]);

        store.save_group_names(&["Book club".to_string()]).unwrap();
        assert_eq!(store.group_names().unwrap(), vec!["Book club"]);
    }

    #[test]
    fn test_contact_names_keep_order() {
        let (store, _dir) = store();
        let names = vec!["Zoe".to_string(), "Ana".to_string()];
        store.save_contact_names(&names).unwrap();
        assert_eq!(store.contact_names().unwrap(), names);
    }
}
