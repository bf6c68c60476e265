use anyhow::{Context, Result};

use crate::bookmarks::{split_tag_input, BookmarkStore};
use crate::model::RecordIdentity;

pub struct ActionDispatcher<'a> {
    bookmarks: &'a mut BookmarkStore,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(bookmarks: &'a mut BookmarkStore) -> Self {
        Self { bookmarks }
    }

    /// Returns whether the record is bookmarked afterwards.
    pub fn toggle_bookmark(&mut self, identity: &RecordIdentity) -> Result<bool> {
        self.bookmarks
            .toggle(identity)
            .with_context(|| format!("toggling bookmark {identity}"))
    }

    pub fn save_meta(&mut self, identity: &RecordIdentity, tags_input: &str, note: &str) -> Result<()> {
        let tags = split_tag_input(tags_input);
        self.bookmarks
            .set_meta(identity, tags, note)
            .with_context(|| format!("saving bookmark details for {identity}"))
    }
}

/// Opens a posting in the system browser.
pub fn open_source(url: &str) -> Result<()> {
    let url = url.trim();
    if url.is_empty() {
        anyhow::bail!("record has no source link");
    }
    open::that(url).with_context(|| format!("opening {url}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn meta_save_bookmarks_the_record() -> Result<()> {
        let mut store = BookmarkStore::load(MemoryStore::shared())?;
        let identity = RecordIdentity::from("https://jobs.example/1");
        {
            let mut dispatcher = ActionDispatcher::new(&mut store);
            dispatcher.save_meta(&identity, "remote, Seoul", "call back")?;
        }
        let bookmark = store.get(&identity).expect("bookmark");
        assert_eq!(bookmark.note, "call back");
        assert_eq!(bookmark.tags.len(), 2);

        let mut dispatcher = ActionDispatcher::new(&mut store);
        assert!(!dispatcher.toggle_bookmark(&identity)?);
        assert!(!store.has(&identity));
        Ok(())
    }

    #[test]
    fn empty_link_is_rejected() {
        assert!(open_source("  ").is_err());
    }
}
