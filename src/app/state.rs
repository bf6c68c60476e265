use std::time::{Duration, Instant};

use anyhow::Result;
use regex::Regex;
use strum::IntoEnumIterator;
use time::Date;
use unicode_segmentation::UnicodeSegmentation;

use crate::app::debounce::Debouncer;
use crate::bookmarks::BookmarkStore;
use crate::config::AppConfig;
use crate::filter::{self, DateFlags, FilterState, HireTypeFacet, RegionFacet, View};
use crate::highlight::query_highlighter;
use crate::history::{RecentSearches, SeenSnapshot};
use crate::model::{Record, RecordIdentity};
use crate::search::parse_query;
use crate::session::SessionSnapshot;
use crate::source::{FetchError, LoadOrigin, LoadOutcome};
use crate::storage::SharedStore;
use crate::window::{RowMeasure, WindowedList};

/// Title, organisation/region line and date line.
pub const CARD_LINES: u16 = 3;
pub const SPACER_LINES: u16 = 1;

pub fn card_height(has_meta: bool) -> u16 {
    CARD_LINES + SPACER_LINES + u16::from(has_meta)
}

/// Row heights for the current filtered list; a bookmark with tags or a note adds a line.
pub struct CardMeasure<'a> {
    filtered: &'a [usize],
    identities: &'a [RecordIdentity],
    bookmarks: &'a BookmarkStore,
}

impl<'a> CardMeasure<'a> {
    pub fn new(
        filtered: &'a [usize],
        identities: &'a [RecordIdentity],
        bookmarks: &'a BookmarkStore,
    ) -> Self {
        Self {
            filtered,
            identities,
            bookmarks,
        }
    }
}

impl RowMeasure for CardMeasure<'_> {
    fn row_height(&self, position: usize) -> u16 {
        let has_meta = self
            .filtered
            .get(position)
            .and_then(|&index| self.identities.get(index))
            .and_then(|identity| self.bookmarks.get(identity))
            .map(|bookmark| bookmark.has_meta())
            .unwrap_or(false);
        card_height(has_meta)
    }
}

/// Removes the last user-perceived character.
pub fn pop_grapheme(text: &mut String) {
    if let Some((index, _)) = text.grapheme_indices(true).next_back() {
        text.truncate(index);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
    /// Showing the last good snapshot after a failed fetch.
    Stale { saved_at: i64, error: FetchError },
    /// Nothing to show.
    Failed(FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetItem {
    Region(RegionFacet),
    HireType(HireTypeFacet),
}

pub fn facet_items() -> Vec<FacetItem> {
    RegionFacet::iter()
        .map(FacetItem::Region)
        .chain(HireTypeFacet::iter().map(FacetItem::HireType))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    Tags,
    Note,
}

#[derive(Debug, Clone)]
pub struct MetaEditor {
    pub identity: RecordIdentity,
    pub title: String,
    pub tags: String,
    pub note: String,
    pub field: MetaField,
}

impl MetaEditor {
    pub fn active_input_mut(&mut self) -> &mut String {
        match self.field {
            MetaField::Tags => &mut self.tags,
            MetaField::Note => &mut self.note,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Overlay {
    Facets { cursor: usize },
    Meta(MetaEditor),
    Help,
}

#[derive(Debug, Clone)]
pub struct SearchInput {
    pub active: bool,
    pub draft: String,
    previous: String,
    recall: Option<usize>,
    debounce: Debouncer,
}

pub struct AppState {
    pub records: Vec<Record>,
    pub identities: Vec<RecordIdentity>,
    pub filtered: Vec<usize>,
    pub filter: FilterState,
    pub list: WindowedList,
    pub selected: usize,
    pub bookmarks: BookmarkStore,
    pub recent: RecentSearches,
    pub seen: SeenSnapshot,
    pub load: LoadState,
    pub search: SearchInput,
    pub overlay: Option<Overlay>,
    pub viewport_height: u16,
    pub today: Date,
    status: Option<String>,
    highlighter: Option<Regex>,
    pending_restore: Option<SessionSnapshot>,
}

impl AppState {
    pub fn new(config: &AppConfig, store: SharedStore, today: Date) -> Result<Self> {
        let bookmarks = BookmarkStore::load(store.clone())?;
        let recent = RecentSearches::load(store.clone(), config.search.recent_limit);
        let seen = SeenSnapshot::load(store);
        Ok(Self {
            records: Vec::new(),
            identities: Vec::new(),
            filtered: Vec::new(),
            filter: FilterState::with_sort(config.default_sort),
            list: WindowedList::new(
                config.window.page_size,
                config.window.max_pages,
                config.window.sentinel_margin,
            ),
            selected: 0,
            bookmarks,
            recent,
            seen,
            load: LoadState::Loading,
            search: SearchInput {
                active: false,
                draft: String::new(),
                previous: String::new(),
                recall: None,
                debounce: Debouncer::new(config.search.debounce()),
            },
            overlay: None,
            viewport_height: 0,
            today,
            status: None,
            highlighter: None,
            pending_restore: None,
        })
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status = message.map(Into::into);
    }

    pub fn highlighter(&self) -> Option<&Regex> {
        self.highlighter.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.filtered.is_empty()
    }

    pub fn record_at(&self, position: usize) -> Option<(&Record, &RecordIdentity)> {
        let index = *self.filtered.get(position)?;
        Some((self.records.get(index)?, self.identities.get(index)?))
    }

    pub fn selected_record(&self) -> Option<(&Record, &RecordIdentity)> {
        self.record_at(self.selected)
    }

    pub fn is_new(&self, identity: &RecordIdentity) -> bool {
        self.seen.is_new(identity)
    }

    pub fn measure(&self) -> CardMeasure<'_> {
        CardMeasure::new(&self.filtered, &self.identities, &self.bookmarks)
    }

    /// Applies the previous run's filter now and its window once records arrive.
    pub fn stage_restore(&mut self, snapshot: SessionSnapshot) {
        self.filter = snapshot.filter.clone();
        self.search.draft = self.filter.query.clone();
        self.pending_restore = Some(snapshot);
    }

    pub fn session_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            filter: self.filter.clone(),
            window: self.list.window(),
            scroll_offset: self.list.scroll_offset(),
            selected: self.selected,
            saved_at: 0,
        }
    }

    pub fn begin_loading(&mut self) {
        if !matches!(self.load, LoadState::Ready | LoadState::Stale { .. }) {
            self.load = LoadState::Loading;
        }
    }

    pub fn apply_outcome(&mut self, outcome: LoadOutcome) {
        // A failed refresh falls back to the snapshot; keep what is on screen.
        if let LoadOrigin::Snapshot { saved_at, error } = &outcome.origin {
            if !self.records.is_empty() {
                self.set_status_message(Some(format!("Refresh failed: {error}")));
                self.load = LoadState::Stale {
                    saved_at: *saved_at,
                    error: error.clone(),
                };
                return;
            }
        }
        self.load = match outcome.origin {
            LoadOrigin::Fresh => LoadState::Ready,
            LoadOrigin::Snapshot { saved_at, error } => LoadState::Stale { saved_at, error },
        };
        self.identities = outcome.records.iter().map(Record::identity).collect();
        self.records = outcome.records;
        if let Err(err) = self.seen.replace(self.identities.iter()) {
            tracing::warn!(?err, "failed to persist seen identities");
        }
        self.apply_filter();
        if let Some(snapshot) = self.pending_restore.take() {
            self.restore_view(&snapshot);
        }
    }

    /// A failed fetch only blanks the view when there is nothing loaded yet.
    pub fn apply_failure(&mut self, error: FetchError) {
        if self.records.is_empty() {
            self.load = LoadState::Failed(error);
        } else {
            self.set_status_message(Some(format!("Refresh failed: {error}")));
        }
    }

    fn restore_view(&mut self, snapshot: &SessionSnapshot) {
        let len = self.filtered.len();
        if !self
            .list
            .restore(len, snapshot.window, snapshot.scroll_offset)
        {
            tracing::debug!(?snapshot.window, len, "saved window no longer fits");
            return;
        }
        let measure = CardMeasure::new(&self.filtered, &self.identities, &self.bookmarks);
        self.list.clamp_scroll(self.viewport_height, &measure);
        if len > 0 {
            self.selected = snapshot.selected.min(len - 1);
            if !self.list.window().contains(self.selected) {
                self.selected = self.list.window().start;
            }
        }
    }

    /// Re-runs the engine and re-enters the window at the top.
    pub fn apply_filter(&mut self) {
        self.filtered = filter::apply(&self.records, &self.filter, &self.bookmarks, self.today);
        self.list.reset(self.filtered.len());
        self.selected = 0;
        self.highlighter = query_highlighter(&parse_query(&self.filter.query));
    }

    pub fn set_viewport_height(&mut self, height: u16) {
        self.viewport_height = height;
    }

    /// Releases the shift guard after a draw and re-checks the sentinels.
    pub fn after_render(&mut self) {
        self.list.finish_render();
        let measure = CardMeasure::new(&self.filtered, &self.identities, &self.bookmarks);
        self.list.on_scroll(self.viewport_height, &measure);
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.filtered.is_empty() {
            return;
        }
        let max = self.filtered.len() - 1;
        let next = if delta.is_negative() {
            self.selected.saturating_sub(delta.unsigned_abs())
        } else {
            self.selected.saturating_add(delta as usize).min(max)
        };
        self.select(next);
    }

    pub fn select_first(&mut self) {
        self.select(0);
    }

    pub fn select_last(&mut self) {
        if let Some(last) = self.filtered.len().checked_sub(1) {
            self.select(last);
        }
    }

    fn select(&mut self, position: usize) {
        self.selected = position;
        let measure = CardMeasure::new(&self.filtered, &self.identities, &self.bookmarks);
        self.list
            .ensure_visible(position, self.viewport_height, &measure);
    }

    /// Line scrolling. The selection follows when it leaves the viewport.
    pub fn scroll_lines(&mut self, delta: i32) {
        if self.filtered.is_empty() {
            return;
        }
        let measure = CardMeasure::new(&self.filtered, &self.identities, &self.bookmarks);
        self.list.scroll_by(delta, self.viewport_height, &measure);
        let offset = self.list.scroll_offset();
        let viewport = u32::from(self.viewport_height);
        let visible = self
            .list
            .offset_of(self.selected, &measure)
            .map(|top| top >= offset && top < offset + viewport.max(1))
            .unwrap_or(false);
        if !visible {
            if let Some(top) = self.list.top_visible(&measure) {
                self.selected = top;
            }
        }
    }

    pub fn begin_search(&mut self) {
        self.search.active = true;
        self.search.previous = self.filter.query.clone();
        self.search.draft = self.filter.query.clone();
        self.search.recall = None;
    }

    pub fn push_search_char(&mut self, ch: char, now: Instant) {
        self.search.draft.push(ch);
        self.search.recall = None;
        self.search.debounce.schedule(now);
    }

    pub fn pop_search_char(&mut self, now: Instant) {
        pop_grapheme(&mut self.search.draft);
        self.search.recall = None;
        self.search.debounce.schedule(now);
    }

    /// Steps through recent searches: positive is older.
    pub fn recall_search(&mut self, step: isize, now: Instant) {
        let entries = self.recent.entries();
        if entries.is_empty() {
            return;
        }
        let next = match (self.search.recall, step.is_negative()) {
            (None, false) => Some(0),
            (None, true) => None,
            (Some(0), true) => None,
            (Some(i), true) => Some(i - 1),
            (Some(i), false) => Some((i + 1).min(entries.len() - 1)),
        };
        self.search.draft = match next {
            Some(i) => entries[i].clone(),
            None => self.search.previous.clone(),
        };
        self.search.recall = next;
        self.search.debounce.schedule(now);
    }

    /// Fires the debounced search. Returns whether the list changed.
    pub fn poll_search(&mut self, now: Instant) -> bool {
        if !self.search.debounce.due(now) {
            return false;
        }
        self.run_search_draft()
    }

    pub fn search_deadline(&self, now: Instant) -> Option<Duration> {
        self.search.debounce.time_until(now)
    }

    /// Enter: applies without waiting and records the query.
    pub fn commit_search(&mut self) {
        self.search.debounce.cancel();
        self.search.active = false;
        self.run_search_draft();
        if let Err(err) = self.recent.record(&self.filter.query) {
            tracing::error!(?err, "failed to record recent search");
        }
    }

    /// Esc: restores the query from before the search started.
    pub fn cancel_search(&mut self) {
        self.search.debounce.cancel();
        self.search.active = false;
        self.search.draft = self.search.previous.clone();
        self.run_search_draft();
    }

    fn run_search_draft(&mut self) -> bool {
        if self.filter.query == self.search.draft {
            return false;
        }
        self.filter.query = self.search.draft.clone();
        self.apply_filter();
        true
    }

    pub fn toggle_facet(&mut self, item: FacetItem) {
        match item {
            FacetItem::Region(region) => self.filter.toggle_region(region),
            FacetItem::HireType(hire) => self.filter.toggle_hire_type(hire),
        }
        self.apply_filter();
    }

    pub fn facet_selected(&self, item: FacetItem) -> bool {
        match item {
            FacetItem::Region(region) => self.filter.regions.contains(&region),
            FacetItem::HireType(hire) => self.filter.hire_types.contains(&hire),
        }
    }

    pub fn cycle_sort(&mut self) {
        self.filter.sort = self.filter.sort.next();
        self.apply_filter();
    }

    pub fn toggle_flag(&mut self, flag: DateFlags) {
        self.filter.toggle_flag(flag);
        self.apply_filter();
    }

    pub fn toggle_view(&mut self) {
        self.filter.view = match self.filter.view {
            View::All => View::Bookmarked,
            View::Bookmarked => View::All,
        };
        self.apply_filter();
    }

    pub fn clear_filters(&mut self) {
        let sort = self.filter.sort;
        self.filter = FilterState::with_sort(sort);
        self.search.draft.clear();
        self.apply_filter();
    }

    /// Keeps the list consistent after a bookmark changed.
    pub fn bookmarks_changed(&mut self) {
        if self.filter.view == View::Bookmarked {
            let selected = self.selected;
            self.apply_filter();
            if !self.filtered.is_empty() {
                self.select(selected.min(self.filtered.len() - 1));
            }
        }
    }

    pub fn open_meta_editor(&mut self) -> bool {
        let Some((record, identity)) = self.selected_record() else {
            return false;
        };
        let (tags, note) = self
            .bookmarks
            .get(identity)
            .map(|bookmark| {
                (
                    bookmark.tags.iter().cloned().collect::<Vec<_>>().join(", "),
                    bookmark.note.clone(),
                )
            })
            .unwrap_or_default();
        self.overlay = Some(Overlay::Meta(MetaEditor {
            identity: identity.clone(),
            title: record.title.clone(),
            tags,
            note,
            field: MetaField::Tags,
        }));
        true
    }

    pub fn meta_editor_mut(&mut self) -> Option<&mut MetaEditor> {
        match self.overlay.as_mut() {
            Some(Overlay::Meta(editor)) => Some(editor),
            _ => None,
        }
    }

    pub fn close_overlay(&mut self) {
        self.overlay = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SortKey;
    use crate::model::sample;
    use crate::storage::MemoryStore;
    use crate::window::RenderWindow;
    use time::macros::date;

    fn records(count: usize) -> Vec<Record> {
        (0..count)
            .map(|i| {
                let mut record = sample(&format!("Job {i}"), "Agency", "서울", "정규직");
                record.source_url = format!("https://jobs.example/{i}");
                record.end_ymd = format!("202603{:02}", (i % 28) + 1);
                record
            })
            .collect()
    }

    fn state_with(count: usize) -> Result<AppState> {
        let mut state = AppState::new(&AppConfig::default(), MemoryStore::shared(), date!(2026 - 02 - 20))?;
        state.set_viewport_height(20);
        state.apply_outcome(LoadOutcome {
            records: records(count),
            origin: LoadOrigin::Fresh,
        });
        Ok(state)
    }

    #[test]
    fn backspace_removes_whole_grapheme() {
        let mut text = String::from("cafe\u{301}");
        pop_grapheme(&mut text);
        assert_eq!(text, "caf");
    }

    #[test]
    fn load_resets_window_to_first_pages() -> Result<()> {
        let state = state_with(120)?;
        assert_eq!(state.load, LoadState::Ready);
        assert_eq!(state.filtered.len(), 120);
        assert_eq!(state.list.window(), RenderWindow { start: 0, end: 60 });
        Ok(())
    }

    #[test]
    fn search_is_debounced_until_deadline() -> Result<()> {
        let mut state = state_with(30)?;
        let start = Instant::now();
        state.begin_search();
        for ch in "job 7".chars() {
            state.push_search_char(ch, start);
        }
        assert!(!state.poll_search(start));
        assert_eq!(state.filtered.len(), 30);
        assert!(state.poll_search(start + Duration::from_millis(300)));
        assert!(state.filtered.len() < 30);
        assert_eq!(state.filtered.first(), Some(&7));
        assert!(state.highlighter().is_some());
        Ok(())
    }

    #[test]
    fn commit_records_recent_and_cancel_restores() -> Result<()> {
        let mut state = state_with(30)?;
        let now = Instant::now();
        state.begin_search();
        state.push_search_char('2', now);
        state.commit_search();
        assert_eq!(state.recent.entries(), ["2".to_string()]);
        let matches = state.filtered.len();

        state.begin_search();
        state.push_search_char('9', now);
        state.cancel_search();
        assert_eq!(state.filter.query, "2");
        assert_eq!(state.filtered.len(), matches);
        Ok(())
    }

    #[test]
    fn facet_and_sort_changes_apply_immediately() -> Result<()> {
        let mut state = state_with(30)?;
        state.toggle_facet(FacetItem::Region(RegionFacet::Busan));
        assert!(state.is_empty());
        state.toggle_facet(FacetItem::Region(RegionFacet::Busan));
        state.cycle_sort();
        assert_eq!(state.filter.sort, SortKey::Latest);
        state.cycle_sort();
        let first = state.selected_record().map(|(r, _)| r.end_ymd.clone());
        assert_eq!(first.as_deref(), Some("20260301"));
        Ok(())
    }

    #[test]
    fn selection_walks_past_window_edge() -> Result<()> {
        let mut state = state_with(120)?;
        for _ in 0..70 {
            state.move_selection(1);
            state.after_render();
        }
        assert_eq!(state.selected, 70);
        let window = state.list.window();
        assert!(window.contains(70));
        assert!(window.len() <= 60);
        Ok(())
    }

    #[test]
    fn bookmarked_view_follows_toggles() -> Result<()> {
        let mut state = state_with(5)?;
        let identity = state.identities[2].clone();
        state.bookmarks.toggle(&identity)?;
        state.toggle_view();
        assert_eq!(state.filtered, vec![2]);
        state.bookmarks.toggle(&identity)?;
        state.bookmarks_changed();
        assert!(state.is_empty());
        Ok(())
    }

    #[test]
    fn meta_line_changes_row_height() -> Result<()> {
        let mut state = state_with(3)?;
        let identity = state.identities[1].clone();
        assert_eq!(state.measure().row_height(1), card_height(false));
        state.bookmarks.set_meta(&identity, ["remote"], "")?;
        assert_eq!(state.measure().row_height(1), card_height(true));
        Ok(())
    }

    #[test]
    fn staged_session_restores_window() -> Result<()> {
        let mut state = AppState::new(&AppConfig::default(), MemoryStore::shared(), date!(2026 - 02 - 20))?;
        let mut filter = FilterState::with_sort(SortKey::Deadline);
        filter.query = "job".into();
        state.stage_restore(SessionSnapshot {
            filter,
            window: RenderWindow { start: 20, end: 80 },
            scroll_offset: 12,
            selected: 25,
            saved_at: 1,
        });
        state.apply_outcome(LoadOutcome {
            records: records(100),
            origin: LoadOrigin::Fresh,
        });
        assert_eq!(state.list.window(), RenderWindow { start: 20, end: 80 });
        assert_eq!(state.list.scroll_offset(), 12);
        assert_eq!(state.selected, 25);
        assert_eq!(state.search.draft, "job");
        Ok(())
    }

    #[test]
    fn saved_offset_past_the_last_card_is_clamped() -> Result<()> {
        let mut state = AppState::new(&AppConfig::default(), MemoryStore::shared(), date!(2026 - 02 - 20))?;
        state.set_viewport_height(20);
        state.stage_restore(SessionSnapshot {
            filter: FilterState::default(),
            window: RenderWindow { start: 0, end: 60 },
            scroll_offset: 10_000,
            selected: 3,
            saved_at: 1,
        });
        state.apply_outcome(LoadOutcome {
            records: records(60),
            origin: LoadOrigin::Fresh,
        });
        let content = state.list.content_height(&state.measure());
        assert_eq!(state.list.scroll_offset(), content - 20);
        Ok(())
    }

    #[test]
    fn snapshot_after_failed_refresh_keeps_position() -> Result<()> {
        let mut state = state_with(120)?;
        for _ in 0..70 {
            state.move_selection(1);
            state.after_render();
        }
        let before = (state.selected, state.list.window(), state.list.scroll_offset());
        state.apply_outcome(LoadOutcome {
            records: records(120),
            origin: LoadOrigin::Snapshot {
                saved_at: 5,
                error: FetchError::Network("offline".into()),
            },
        });
        assert_eq!(
            (state.selected, state.list.window(), state.list.scroll_offset()),
            before
        );
        assert!(matches!(state.load, LoadState::Stale { saved_at: 5, .. }));
        assert!(state.status_message().unwrap_or_default().contains("offline"));
        Ok(())
    }

    #[test]
    fn failure_keeps_loaded_records() -> Result<()> {
        let mut state = state_with(3)?;
        state.apply_failure(FetchError::Network("down".into()));
        assert_eq!(state.load, LoadState::Ready);
        assert!(state.status_message().unwrap_or_default().contains("down"));

        let mut empty = AppState::new(&AppConfig::default(), MemoryStore::shared(), date!(2026 - 02 - 20))?;
        empty.apply_failure(FetchError::Upstream("bad".into()));
        assert!(matches!(empty.load, LoadState::Failed(FetchError::Upstream(_))));
        Ok(())
    }
}
