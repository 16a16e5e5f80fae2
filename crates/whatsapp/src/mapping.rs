//! Address-book collection: group and contact names from the filtered chat
//! list, then phone numbers for every contact not yet mapped.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use wabridge_browser::Page;
use wabridge_core::{normalize_name, Error, Result, WhatsAppConfig};
use wabridge_storage::IndexStore;

use crate::messaging::{close_page, ContactResolution, Messenger};
use crate::registry::SessionRegistry;
use crate::scripts;

pub struct Mapper {
    registry: Arc<SessionRegistry>,
    config: Arc<WhatsAppConfig>,
    index: IndexStore,
    messenger: Arc<Messenger>,
}

impl Mapper {
    pub fn new(
        registry: Arc<SessionRegistry>,
        config: Arc<WhatsAppConfig>,
        index: IndexStore,
        messenger: Arc<Messenger>,
    ) -> Self {
        Self {
            registry,
            config,
            index,
            messenger,
        }
    }

    /// Replaces the group index with every name in the groups view.
    pub async fn map_groups(&self, token: &str) -> Result<usize> {
        info!(token, "Mapping all groups");
        let names = self
            .collect_names(token, &self.config.locators.list_filter_groups)
            .await?;
        self.index.save_group_names(&names)?;
        Ok(names.len())
    }

    /// Replaces the contact-name index with every name in the contacts view.
    pub async fn map_contacts(&self, token: &str) -> Result<usize> {
        info!(token, "Mapping all contacts");
        let names = self
            .collect_names(token, &self.config.locators.list_filter_contacts)
            .await?;
        self.index.save_contact_names(&names)?;
        Ok(names.len())
    }

    /// Resolves, one at a time, every collected contact name that has no id
    /// yet. The index is written after each hit so an interrupted run keeps
    /// its progress. Returns the number of names newly mapped.
    pub async fn map_phone_numbers(&self, token: &str) -> Result<usize> {
        // Fail fast on a bad token even when there is nothing to resolve.
        self.registry.session(token).await?;

        let names = self.index.contact_names()?;
        let known = self.index.contact_ids()?;
        let mut mapped = 0;
        for name in names {
            if known.contains_key(&normalize_name(&name)) {
                debug!(name = %name, "Already in contact index");
                continue;
            }
            match self.messenger.lookup_contact(token, &name).await? {
                ContactResolution::Found(chat_id) => {
                    self.index.insert_contact_id(&name, &chat_id)?;
                    mapped += 1;
                }
                ContactResolution::NotFound => debug!(name = %name, "Left unmapped"),
            }
        }
        info!(token, mapped, "Phone number mapping finished");
        Ok(mapped)
    }

    /// Groups, then contacts, then phone numbers. Any step failing fails the run.
    pub async fn run_mapping(&self, token: &str) -> Result<()> {
        self.map_groups(token).await?;
        self.map_contacts(token).await?;
        self.map_phone_numbers(token).await?;
        Ok(())
    }

    async fn collect_names(&self, token: &str, filter: &str) -> Result<Vec<String>> {
        let browser = self.registry.session(token).await?;
        let page = browser.new_page(&self.config.base_url).await?;
        let result = self.collect_on_page(page.as_ref(), filter).await;
        close_page(page.as_ref()).await;
        result
    }

    async fn collect_on_page(&self, page: &dyn Page, filter: &str) -> Result<Vec<String>> {
        let locators = &self.config.locators;
        let timings = &self.config.timings;

        tokio::time::sleep(timings.mapping_settle()).await;
        page.click(&locators.list_filter).await?;
        tokio::time::sleep(timings.filter_settle()).await;
        page.click(filter).await?;
        tokio::time::sleep(timings.filter_settle()).await;

        let names = page
            .evaluate(
                scripts::SCROLL_COLLECT_NAMES,
                vec![
                    json!(locators.list_container),
                    json!(locators.list_item_name),
                    json!(timings.scroll_step_px),
                    json!(timings.scroll_interval_ms),
                ],
            )
            .await?;
        if names.is_null() {
            return Ok(Vec::new());
        }
        let names: Vec<String> = serde_json::from_value(names)
            .map_err(|e| Error::Driver(format!("Unexpected name list shape: {}", e)))?;

        let mut unique: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        debug!(count = unique.len(), "Names collected");
        Ok(unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use wabridge_storage::SessionStore;

    async fn mapper(h: &Harness) -> Mapper {
        let registry = Arc::new(SessionRegistry::new(
            h.driver(),
            h.process_control(),
            SessionStore::new(&h.paths),
        ));
        registry.create("tok").await.unwrap();
        let config = Arc::new(h.config.clone());
        let index = IndexStore::new(&h.paths);
        let messenger =
            Arc::new(Messenger::new(registry.clone(), config.clone(), index.clone()).unwrap());
        Mapper::new(registry, config, index, messenger)
    }

    fn phone_lookup_succeeds(h: &Harness) {
        let mut state = h.fake.state();
        state.respond(scripts::OPEN_MENU, vec![json!(true)]);
        state.respond(scripts::CLICK_LABELED, vec![json!(true)]);
        state.respond(scripts::SCRAPE_PHONE, vec![json!("+55 11 97777-6666")]);
    }

    #[tokio::test]
    async fn test_single_unmapped_name_resolves_once() {
        let h = Harness::new();
        let index = IndexStore::new(&h.paths);
        index
            .save_contact_names(&["Ana".to_string(), "Bia".to_string()])
            .unwrap();
        index.insert_contact_id("Ana", "+55 11 98888-7777").unwrap();
        phone_lookup_succeeds(&h);
        let mapper = mapper(&h).await;

        let mapped = mapper.map_phone_numbers("tok").await.unwrap();

        assert_eq!(mapped, 1);
        let state = h.fake.state();
        assert_eq!(state.count("type:"), 1);
        assert_eq!(state.count("type:Bia"), 1);
        let ids = index.contact_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids["Bia"], "+55 11 97777-6666");
        assert_eq!(ids["Ana"], "+55 11 98888-7777");
    }

    #[tokio::test]
    async fn test_unresolvable_names_are_skipped() {
        let h = Harness::new();
        let index = IndexStore::new(&h.paths);
        index.save_contact_names(&["Zé 🎉".to_string()]).unwrap();
        for variant in 0..2 {
            let sel = h.config.locators.contact_title("Zé 🎉", variant);
            h.fake.state().missing.insert(sel);
        }
        let mapper = mapper(&h).await;

        assert_eq!(mapper.map_phone_numbers("tok").await.unwrap(), 0);
        assert!(index.contact_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_map_groups_overwrites_index() {
        let h = Harness::new();
        let index = IndexStore::new(&h.paths);
        index.save_group_names(&["Old".to_string()]).unwrap();
        h.fake.state().respond(
            scripts::SCROLL_COLLECT_NAMES,
            vec![json!(["Família 🏠", "Trabalho", "Trabalho"])],
        );
        let mapper = mapper(&h).await;

        assert_eq!(mapper.map_groups("tok").await.unwrap(), 2);

        assert_eq!(index.group_names().unwrap(), vec!["Família", "Trabalho"]);
        let groups_filter = format!("click:{}", h.config.locators.list_filter_groups);
        assert_eq!(h.fake.state().count(&groups_filter), 1);
    }

    #[tokio::test]
    async fn test_run_mapping_runs_all_steps() {
        let h = Harness::new();
        h.fake.state().respond(
            scripts::SCROLL_COLLECT_NAMES,
            vec![json!(["Grupo"]), json!(["Carla"])],
        );
        phone_lookup_succeeds(&h);
        let mapper = mapper(&h).await;

        mapper.run_mapping("tok").await.unwrap();

        let index = IndexStore::new(&h.paths);
        assert_eq!(index.group_names().unwrap(), vec!["Grupo"]);
        assert_eq!(index.contact_names().unwrap(), vec!["Carla"]);
        assert_eq!(
            index.lookup_contact_id("Carla").unwrap().as_deref(),
            Some("+55 11 97777-6666")
        );
    }

    #[tokio::test]
    async fn test_unknown_token_maps_nothing() {
        let h = Harness::new();
        let mapper = mapper(&h).await;
        let before = h.fake.state().pages_opened.len();

        let err = mapper.run_mapping("ghost").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(h.fake.state().pages_opened.len(), before);
    }
}
