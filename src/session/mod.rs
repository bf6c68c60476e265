use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::SessionConfig;
use crate::filter::FilterState;
use crate::storage::{keys, load_json, save_json, SharedStore};
use crate::window::RenderWindow;

/// UI state journaled between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSnapshot {
    pub filter: FilterState,
    pub window: RenderWindow,
    pub scroll_offset: u32,
    pub selected: usize,
    /// Unix seconds of the write.
    pub saved_at: i64,
}

impl SessionSnapshot {
    fn same_view(&self, other: &SessionSnapshot) -> bool {
        self.filter == other.filter
            && self.window == other.window
            && self.scroll_offset == other.scroll_offset
            && self.selected == other.selected
    }
}

#[derive(Debug, Clone)]
pub enum SessionStatus {
    Disabled,
    Idle {
        last_saved_at: Option<OffsetDateTime>,
    },
    Pending {
        since: OffsetDateTime,
    },
    Error {
        message: String,
        occurred_at: OffsetDateTime,
    },
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Saved { timestamp: OffsetDateTime },
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushKind {
    Throttled,
    Immediate,
}

/// Writes the current view at most once per throttle interval, plus a final flush on exit.
pub struct SessionRecorder {
    store: SharedStore,
    enabled: bool,
    throttle: Duration,
    current: Option<SessionSnapshot>,
    dirty_since: Option<OffsetDateTime>,
    last_write: Option<Instant>,
    last_saved_at: Option<OffsetDateTime>,
    last_error: Option<(String, OffsetDateTime)>,
}

impl SessionRecorder {
    pub fn new(store: SharedStore, config: &SessionConfig) -> Self {
        Self {
            store,
            enabled: config.persist,
            throttle: config.throttle(),
            current: None,
            dirty_since: None,
            last_write: None,
            last_saved_at: None,
            last_error: None,
        }
    }

    /// Previous run's view, if any.
    pub fn load(&self) -> Option<SessionSnapshot> {
        if !self.enabled {
            return None;
        }
        match load_json::<SessionSnapshot>(&*self.store, keys::UI_SESSION) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(?err, "discarding unreadable session state");
                None
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        if !self.enabled {
            return SessionStatus::Disabled;
        }
        if let Some((message, occurred_at)) = &self.last_error {
            return SessionStatus::Error {
                message: message.clone(),
                occurred_at: *occurred_at,
            };
        }
        if let Some(since) = self.dirty_since {
            return SessionStatus::Pending { since };
        }
        SessionStatus::Idle {
            last_saved_at: self.last_saved_at,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    pub fn update(&mut self, snapshot: SessionSnapshot) {
        if !self.enabled {
            return;
        }
        if self
            .current
            .as_ref()
            .map(|current| current.same_view(&snapshot))
            .unwrap_or(false)
        {
            return;
        }
        self.current = Some(snapshot);
        if self.dirty_since.is_none() {
            self.dirty_since = Some(OffsetDateTime::now_utc());
        }
    }

    pub fn poll(&mut self) -> Option<SessionEvent> {
        self.flush_internal(FlushKind::Throttled)
    }

    pub fn flush_now(&mut self) -> Option<SessionEvent> {
        self.flush_internal(FlushKind::Immediate)
    }

    fn flush_internal(&mut self, mode: FlushKind) -> Option<SessionEvent> {
        if !self.enabled || self.dirty_since.is_none() {
            return None;
        }
        if mode == FlushKind::Throttled {
            let ready = self
                .last_write
                .map(|at| at.elapsed() >= self.throttle)
                .unwrap_or(true);
            if !ready {
                return None;
            }
        }
        let snapshot = self.current.as_mut()?;
        let timestamp = OffsetDateTime::now_utc();
        snapshot.saved_at = timestamp.unix_timestamp();
        self.last_write = Some(Instant::now());
        match save_json(&*self.store, keys::UI_SESSION, &*snapshot) {
            Ok(()) => {
                self.dirty_since = None;
                self.last_saved_at = Some(timestamp);
                self.last_error = None;
                tracing::trace!(?mode, "session state saved");
                Some(SessionEvent::Saved { timestamp })
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::error!(?err, "failed to save session state");
                self.last_error = Some((message.clone(), timestamp));
                Some(SessionEvent::Error { message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SortKey;
    use crate::storage::MemoryStore;
    use assert_matches::assert_matches;

    fn config(throttle_ms: u64) -> SessionConfig {
        SessionConfig {
            persist: true,
            throttle_ms,
        }
    }

    fn view(sort: SortKey, offset: u32) -> SessionSnapshot {
        SessionSnapshot {
            filter: FilterState::with_sort(sort),
            window: RenderWindow { start: 20, end: 80 },
            scroll_offset: offset,
            selected: 31,
            saved_at: 0,
        }
    }

    #[test]
    fn first_change_flushes_then_throttles() {
        let store = MemoryStore::shared();
        let mut recorder = SessionRecorder::new(store.clone(), &config(60_000));
        assert!(recorder.poll().is_none());

        recorder.update(view(SortKey::Deadline, 10));
        assert_matches!(recorder.poll(), Some(SessionEvent::Saved { .. }));

        recorder.update(view(SortKey::Deadline, 11));
        assert!(recorder.poll().is_none(), "inside throttle window");
        assert_matches!(recorder.status(), SessionStatus::Pending { .. });

        assert_matches!(recorder.flush_now(), Some(SessionEvent::Saved { .. }));
        let restored = SessionRecorder::new(store, &config(0)).load().expect("snapshot");
        assert_eq!(restored.scroll_offset, 11);
        assert_eq!(restored.filter.sort, SortKey::Deadline);
        assert!(restored.saved_at > 0);
    }

    #[test]
    fn unchanged_view_is_not_rewritten() {
        let mut recorder = SessionRecorder::new(MemoryStore::shared(), &config(0));
        recorder.update(view(SortKey::Latest, 3));
        assert!(recorder.flush_now().is_some());
        recorder.update(view(SortKey::Latest, 3));
        assert!(!recorder.is_dirty());
        assert!(recorder.flush_now().is_none());
    }

    #[test]
    fn disabled_recorder_never_writes() {
        let store = MemoryStore::shared();
        let mut recorder = SessionRecorder::new(
            store.clone(),
            &SessionConfig {
                persist: false,
                throttle_ms: 0,
            },
        );
        recorder.update(view(SortKey::Default, 0));
        assert!(recorder.flush_now().is_none());
        assert_matches!(recorder.status(), SessionStatus::Disabled);
        assert!(store.get(keys::UI_SESSION).ok().flatten().is_none());
    }

    #[test]
    fn corrupt_session_is_ignored() -> anyhow::Result<()> {
        let store = MemoryStore::shared();
        store.set(keys::UI_SESSION, "{\"filter\":")?;
        assert!(SessionRecorder::new(store, &config(0)).load().is_none());
        Ok(())
    }
}
