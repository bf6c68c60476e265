use std::collections::HashSet;

use anyhow::{Context, Result};

use crate::model::RecordIdentity;
use crate::storage::{keys, load_json, save_json, SharedStore};

pub const RECENT_SEARCH_LIMIT: usize = 10;
pub const SEEN_SNAPSHOT_LIMIT: usize = 200;

/// Most-recent-first list of committed search queries.
pub struct RecentSearches {
    store: SharedStore,
    limit: usize,
    entries: Vec<String>,
}

impl RecentSearches {
    pub fn load(store: SharedStore, limit: usize) -> Self {
        let limit = limit.max(1);
        let mut entries = match load_json::<Vec<String>>(&*store, keys::RECENT_SEARCHES) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(?err, "recent searches unreadable, starting empty");
                Vec::new()
            }
        };
        entries.truncate(limit);
        Self {
            store,
            limit,
            entries,
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Moves `query` to the front. Blank queries are ignored.
    pub fn record(&mut self, query: &str) -> Result<()> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(());
        }
        let lowered = query.to_lowercase();
        self.entries
            .retain(|existing| existing.to_lowercase() != lowered);
        self.entries.insert(0, query.to_string());
        self.entries.truncate(self.limit);
        save_json(&*self.store, keys::RECENT_SEARCHES, &self.entries)
            .context("persisting recent searches")
    }

    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.store
            .remove(keys::RECENT_SEARCHES)
            .context("clearing recent searches")
    }
}

/// Identities seen on the previous load, used for the `NEW` badge.
pub struct SeenSnapshot {
    store: SharedStore,
    previous: Option<HashSet<RecordIdentity>>,
}

impl SeenSnapshot {
    pub fn load(store: SharedStore) -> Self {
        let previous = match load_json::<Vec<RecordIdentity>>(&*store, keys::SEEN_IDENTITIES) {
            Ok(previous) => previous.map(|ids| ids.into_iter().collect()),
            Err(err) => {
                tracing::warn!(?err, "seen snapshot unreadable, ignoring");
                None
            }
        };
        Self { store, previous }
    }

    /// A first visit has no baseline, so nothing is new.
    pub fn is_new(&self, identity: &RecordIdentity) -> bool {
        self.previous
            .as_ref()
            .map(|seen| !seen.contains(identity))
            .unwrap_or(false)
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    /// Persists the first [`SEEN_SNAPSHOT_LIMIT`] identities as the next
    /// baseline. The in-memory baseline is kept for the running session.
    pub fn replace<'a, I>(&self, identities: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a RecordIdentity>,
    {
        let snapshot: Vec<&RecordIdentity> =
            identities.into_iter().take(SEEN_SNAPSHOT_LIMIT).collect();
        save_json(&*self.store, keys::SEEN_IDENTITIES, &snapshot)
            .context("persisting seen identities")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn recent_searches_are_deduped_and_capped() -> Result<()> {
        let store = MemoryStore::shared();
        let mut recent = RecentSearches::load(store.clone(), RECENT_SEARCH_LIMIT);
        for i in 0..12 {
            recent.record(&format!("query {i}"))?;
        }
        recent.record("QUERY 5")?;
        recent.record("   ")?;
        assert_eq!(recent.entries().len(), RECENT_SEARCH_LIMIT);
        assert_eq!(recent.entries()[0], "QUERY 5");
        assert_eq!(
            recent
                .entries()
                .iter()
                .filter(|q| q.eq_ignore_ascii_case("query 5"))
                .count(),
            1
        );

        let reloaded = RecentSearches::load(store, RECENT_SEARCH_LIMIT);
        assert_eq!(reloaded.entries(), recent.entries());
        Ok(())
    }

    #[test]
    fn first_visit_has_nothing_new() -> Result<()> {
        let store = MemoryStore::shared();
        let seen = SeenSnapshot::load(store.clone());
        let a = RecordIdentity::from("a");
        assert!(!seen.has_baseline());
        assert!(!seen.is_new(&a));
        seen.replace([&a])?;

        let next = SeenSnapshot::load(store);
        assert!(!next.is_new(&a));
        assert!(next.is_new(&RecordIdentity::from("b")));
        Ok(())
    }

    #[test]
    fn seen_snapshot_is_capped() -> Result<()> {
        let store = MemoryStore::shared();
        let ids: Vec<RecordIdentity> = (0..250).map(|i| RecordIdentity::from(format!("id{i}"))).collect();
        SeenSnapshot::load(store.clone()).replace(ids.iter())?;
        let stored: Vec<RecordIdentity> =
            load_json(&*store, keys::SEEN_IDENTITIES)?.unwrap_or_default();
        assert_eq!(stored.len(), SEEN_SNAPSHOT_LIMIT);
        assert_eq!(stored[0], ids[0]);
        Ok(())
    }
}
