use super::{RuleStore, StoreError};
use crate::rule::{sort_by_specificity, Rule};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// In-memory implementation of [`RuleStore`]
///
/// A site exists exactly when it has an entry in the map. Each entry holds the
/// site's rules, re-sorted by specificity on every upsert, so reads need no
/// sorting. The map's per-entry locking makes site creation and rule
/// replacement atomic.
#[derive(Default)]
pub struct MemoryStore {
    sites: DashMap<String, Vec<Rule>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create_site(&self, site: &str) -> Result<(), StoreError> {
        match self.sites.entry(site.to_string()) {
            Entry::Occupied(_) => Err(StoreError::SiteExists(site.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Vec::new());
                Ok(())
            }
        }
    }

    async fn site_exists(&self, site: &str) -> Result<bool, StoreError> {
        Ok(self.sites.contains_key(site))
    }

    async fn upsert_rule(&self, rule: &Rule) -> Result<(), StoreError> {
        let mut rules = self
            .sites
            .get_mut(&rule.site)
            .ok_or_else(|| StoreError::UnknownSite(rule.site.clone()))?;

        let rules = rules.value_mut();
        rules.retain(|existing| existing.key() != rule.key());
        rules.push(rule.clone());
        sort_by_specificity(rules);
        Ok(())
    }

    async fn get_rules(&self, site: &str) -> Result<Vec<Rule>, StoreError> {
        Ok(self
            .sites
            .get(site)
            .map(|rules| rules.value().clone())
            .unwrap_or_default())
    }
}
