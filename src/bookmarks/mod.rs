use std::collections::HashSet;

use anyhow::{Context, Result};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::RecordIdentity;
use crate::storage::{keys, load_json, save_json, SharedStore};

pub const MAX_TAGS: usize = 20;
const MAX_TAG_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Unix timestamp in milliseconds.
    pub saved_at: i64,
    #[serde(default)]
    pub tags: IndexSet<String>,
    #[serde(default)]
    pub note: String,
}

impl Bookmark {
    fn new_now() -> Self {
        Self {
            saved_at: now_millis(),
            tags: IndexSet::new(),
            note: String::new(),
        }
    }

    pub fn has_meta(&self) -> bool {
        !self.tags.is_empty() || !self.note.trim().is_empty()
    }
}

pub trait BookmarkLookup {
    fn is_bookmarked(&self, identity: &RecordIdentity) -> bool;
}

impl BookmarkLookup for HashSet<RecordIdentity> {
    fn is_bookmarked(&self, identity: &RecordIdentity) -> bool {
        self.contains(identity)
    }
}

/// Bookmarks keyed by record identity.
///
/// Toggling an existing bookmark deletes it together with its tags and note.
/// Every mutation rewrites the whole map to storage before returning; when
/// the write fails the in-memory change is rolled back.
pub struct BookmarkStore {
    store: SharedStore,
    entries: IndexMap<RecordIdentity, Bookmark>,
}

impl BookmarkStore {
    pub fn load(store: SharedStore) -> Result<Self> {
        let entries = match load_json::<IndexMap<RecordIdentity, Bookmark>>(&*store, keys::BOOKMARKS)
        {
            Ok(entries) => entries.unwrap_or_default(),
            Err(err) => {
                let raw = store.get(keys::BOOKMARKS)?.unwrap_or_default();
                store
                    .set(keys::BOOKMARKS_BACKUP, &raw)
                    .context("backing up unreadable bookmarks")?;
                tracing::warn!(
                    ?err,
                    backup = keys::BOOKMARKS_BACKUP,
                    "stored bookmarks unreadable, starting empty"
                );
                IndexMap::new()
            }
        };
        Ok(Self { store, entries })
    }

    pub fn has(&self, identity: &RecordIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, identity: &RecordIdentity) -> Option<&Bookmark> {
        self.entries.get(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordIdentity, &Bookmark)> {
        self.entries.iter()
    }

    /// Returns the new membership state.
    pub fn toggle(&mut self, identity: &RecordIdentity) -> Result<bool> {
        if let Some((index, _, previous)) = self.entries.swap_remove_full(identity) {
            if let Err(err) = self.persist() {
                let (last, _) = self.entries.insert_full(identity.clone(), previous);
                self.entries.swap_indices(index, last);
                return Err(err);
            }
            return Ok(false);
        }
        self.entries.insert(identity.clone(), Bookmark::new_now());
        if let Err(err) = self.persist() {
            self.entries.shift_remove(identity);
            return Err(err);
        }
        Ok(true)
    }

    /// Replaces tags and note, creating the bookmark when absent.
    pub fn set_meta<I, S>(&mut self, identity: &RecordIdentity, tags: I, note: &str) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags = normalize_tags(tags);
        let previous = self.entries.get(identity).cloned();
        let entry = self
            .entries
            .entry(identity.clone())
            .or_insert_with(Bookmark::new_now);
        entry.tags = tags;
        entry.note = note.trim().to_string();
        if let Err(err) = self.persist() {
            match previous {
                Some(previous) => {
                    self.entries.insert(identity.clone(), previous);
                }
                None => {
                    self.entries.shift_remove(identity);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        save_json(&*self.store, keys::BOOKMARKS, &self.entries).context("persisting bookmarks")
    }
}

impl BookmarkLookup for BookmarkStore {
    fn is_bookmarked(&self, identity: &RecordIdentity) -> bool {
        self.has(identity)
    }
}

/// Trims, drops blanks, de-duplicates (first wins) and caps at [`MAX_TAGS`].
pub fn normalize_tags<I, S>(tags: I) -> IndexSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = IndexSet::new();
    for tag in tags {
        let mut tag = tag.as_ref().trim().to_string();
        if tag.is_empty() {
            continue;
        }
        if tag.len() > MAX_TAG_LEN {
            let mut cut = MAX_TAG_LEN;
            while !tag.is_char_boundary(cut) {
                cut -= 1;
            }
            tag.truncate(cut);
        }
        out.insert(tag);
        if out.len() == MAX_TAGS {
            break;
        }
    }
    out
}

/// Splits comma separated tag input as typed in the editor or CLI.
pub fn split_tag_input(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
