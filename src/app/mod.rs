use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use crate::config::themes::{Palette, ThemeRegistry};
use crate::config::AppConfig;
use crate::filter::DateFlags;
use crate::model::today_at;
use crate::session::{SessionEvent, SessionRecorder};
use crate::source::{FetchReport, FetchWorker, JobSource};
use crate::storage::SharedStore;
use crate::ui;

mod actions;
pub mod debounce;
pub mod state;

pub use actions::{open_source, ActionDispatcher};
pub use state::{AppState, FacetItem, LoadState, MetaEditor, MetaField, Overlay};

const WHEEL_LINES: i32 = 3;

enum Action {
    Quit,
    SelectNext,
    SelectPrevious,
    PageDown,
    PageUp,
    HalfPageDown,
    HalfPageUp,
    SelectFirst,
    SelectLast,
    StartSearch,
    OpenFacets,
    CycleSort,
    ToggleFlag(DateFlags),
    ToggleView,
    ClearFilters,
    ToggleBookmark,
    EditBookmark,
    OpenSource,
    Refresh,
    ShowHelp,
}

pub struct App {
    pub config: Arc<AppConfig>,
    state: AppState,
    worker: FetchWorker,
    session: SessionRecorder,
    palette: Palette,
    should_quit: bool,
    tick_rate: Duration,
}

impl App {
    pub fn new(config: Arc<AppConfig>, store: SharedStore, source: Arc<dyn JobSource>) -> Result<Self> {
        let today = today_at(config.utc_offset());
        let mut state = AppState::new(&config, store.clone(), today)
            .context("loading bookmarks and history for initial state")?;
        let session = SessionRecorder::new(store.clone(), &config.session);
        if let Some(snapshot) = session.load() {
            tracing::debug!(window = ?snapshot.window, "restoring previous session");
            state.stage_restore(snapshot);
        }
        let worker = FetchWorker::new(source, store, config.offline.fallback_to_snapshot);
        let palette = ThemeRegistry::default().palette(config.theme);
        Ok(Self {
            config,
            state,
            worker,
            session,
            palette,
            should_quit: false,
            tick_rate: Duration::from_millis(250),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        self.request_load();
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        self.flush_session();
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            let area = terminal.size().context("reading terminal size")?;
            self.state
                .set_viewport_height(ui::list_viewport_height(area).unwrap_or(0));
            terminal
                .draw(|frame| ui::draw_app(frame, &self.state, &self.palette))
                .context("rendering frame")?;
            self.state.after_render();

            if self.should_quit {
                break;
            }

            let mut timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));
            if let Some(search_due) = self.state.search_deadline(Instant::now()) {
                timeout = timeout.min(search_due);
            }

            if event::poll(timeout).context("polling for terminal events")? {
                match event::read().context("reading terminal event")? {
                    Event::Key(key) => self.handle_key(key),
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Resize(_, _) => {
                        // viewport height is re-read before the next draw
                    }
                    _ => {}
                }
            }

            self.state.poll_search(Instant::now());

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn request_load(&mut self) {
        self.state.begin_loading();
        match self.worker.request() {
            Ok(generation) => tracing::info!(generation, "loading listings"),
            Err(err) => {
                tracing::error!(?err, "failed to start fetch");
                self.state
                    .set_status_message(Some("Could not start loading listings"));
            }
        }
    }

    fn on_tick(&mut self) {
        if let Some(report) = self.worker.try_recv() {
            self.apply_report(report);
        }
        if self.session_ready() {
            self.session.update(self.state.session_snapshot());
        }
        if let Some(event) = self.session.poll() {
            self.handle_session_event(event);
        }
    }

    fn apply_report(&mut self, report: FetchReport) {
        match report.result {
            Ok(outcome) => {
                let count = outcome.records.len();
                let stale = outcome.is_stale();
                tracing::info!(generation = report.generation, count, stale, "listings loaded");
                self.state.apply_outcome(outcome);
                if !stale {
                    self.state.set_status_message(Some(format!("Loaded {count} listings")));
                }
            }
            Err(err) => {
                tracing::warn!(generation = report.generation, ?err, "listing load failed");
                self.state.apply_failure(err);
            }
        }
    }

    /// The saved view is only overwritten once records have arrived.
    fn session_ready(&self) -> bool {
        matches!(self.state.load, LoadState::Ready | LoadState::Stale { .. })
    }

    fn flush_session(&mut self) {
        if self.session_ready() {
            self.session.update(self.state.session_snapshot());
        }
        if let Some(event) = self.session.flush_now() {
            self.handle_session_event(event);
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Saved { timestamp } => {
                tracing::trace!(%timestamp, "session saved");
            }
            SessionEvent::Error { message } => {
                self.state
                    .set_status_message(Some(format!("Session not saved: {message}")));
            }
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        if self.state.overlay.is_some() {
            return;
        }
        match mouse.kind {
            MouseEventKind::ScrollDown => self.state.scroll_lines(WHEEL_LINES),
            MouseEventKind::ScrollUp => self.state.scroll_lines(-WHEEL_LINES),
            _ => {}
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        if self.handle_overlay_key(key) {
            return;
        }

        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);

        if self.state.search.active {
            let now = Instant::now();
            match key.code {
                KeyCode::Esc => self.state.cancel_search(),
                KeyCode::Enter => self.state.commit_search(),
                KeyCode::Backspace => self.state.pop_search_char(now),
                KeyCode::Up => self.state.recall_search(1, now),
                KeyCode::Down => self.state.recall_search(-1, now),
                KeyCode::Char(ch) if plain => self.state.push_search_char(ch, now),
                _ => {}
            }
            return;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let action = match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Char('c') if ctrl => Some(Action::Quit),
            KeyCode::Char('d') if ctrl => Some(Action::HalfPageDown),
            KeyCode::Char('u') if ctrl => Some(Action::HalfPageUp),
            KeyCode::Char('j') | KeyCode::Down => Some(Action::SelectNext),
            KeyCode::Char('k') | KeyCode::Up => Some(Action::SelectPrevious),
            KeyCode::PageDown => Some(Action::PageDown),
            KeyCode::PageUp => Some(Action::PageUp),
            KeyCode::Char('g') | KeyCode::Home => Some(Action::SelectFirst),
            KeyCode::Char('G') | KeyCode::End => Some(Action::SelectLast),
            KeyCode::Char('/') if plain => Some(Action::StartSearch),
            KeyCode::Char('f') if plain => Some(Action::OpenFacets),
            KeyCode::Char('s') if plain => Some(Action::CycleSort),
            KeyCode::Char('c') if plain => Some(Action::ToggleFlag(DateFlags::EXCLUDE_CLOSED)),
            KeyCode::Char('w') if plain => Some(Action::ToggleFlag(DateFlags::DUE_WITHIN_WEEK)),
            KeyCode::Char('t') if plain => Some(Action::ToggleFlag(DateFlags::POSTED_TODAY)),
            KeyCode::Char('b') if plain => Some(Action::ToggleView),
            KeyCode::Char('x') if plain => Some(Action::ClearFilters),
            KeyCode::Char(' ') | KeyCode::Char('m') if plain => Some(Action::ToggleBookmark),
            KeyCode::Char('e') if plain => Some(Action::EditBookmark),
            KeyCode::Char('o') | KeyCode::Enter if plain => Some(Action::OpenSource),
            KeyCode::Char('r') if plain => Some(Action::Refresh),
            KeyCode::Char('?') => Some(Action::ShowHelp),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        let page = i32::from(self.state.viewport_height.max(1));
        match action {
            Action::Quit => self.should_quit = true,
            Action::SelectNext => self.state.move_selection(1),
            Action::SelectPrevious => self.state.move_selection(-1),
            Action::PageDown => self.state.scroll_lines(page),
            Action::PageUp => self.state.scroll_lines(-page),
            Action::HalfPageDown => self.state.scroll_lines(page / 2),
            Action::HalfPageUp => self.state.scroll_lines(-(page / 2)),
            Action::SelectFirst => self.state.select_first(),
            Action::SelectLast => self.state.select_last(),
            Action::StartSearch => self.state.begin_search(),
            Action::OpenFacets => self.state.overlay = Some(Overlay::Facets { cursor: 0 }),
            Action::CycleSort => self.state.cycle_sort(),
            Action::ToggleFlag(flag) => self.state.toggle_flag(flag),
            Action::ToggleView => self.state.toggle_view(),
            Action::ClearFilters => {
                self.state.clear_filters();
                self.state.set_status_message(Some("Filters cleared"));
            }
            Action::ToggleBookmark => self.handle_toggle_bookmark(),
            Action::EditBookmark => {
                self.state.open_meta_editor();
            }
            Action::OpenSource => self.handle_open_source(),
            Action::Refresh => {
                self.state.today = today_at(self.config.utc_offset());
                self.request_load();
            }
            Action::ShowHelp => self.state.overlay = Some(Overlay::Help),
        }
    }

    fn handle_toggle_bookmark(&mut self) {
        let Some(identity) = self.state.selected_record().map(|(_, id)| id.clone()) else {
            return;
        };
        let mut dispatcher = ActionDispatcher::new(&mut self.state.bookmarks);
        match dispatcher.toggle_bookmark(&identity) {
            Ok(saved) => {
                self.state.bookmarks_changed();
                let message = if saved {
                    "Bookmarked"
                } else {
                    "Bookmark removed"
                };
                self.state.set_status_message(Some(message));
            }
            Err(err) => {
                tracing::error!(?err, "failed to toggle bookmark");
                self.state
                    .set_status_message(Some("Failed to update bookmark"));
            }
        }
    }

    fn handle_open_source(&mut self) {
        let Some(url) = self
            .state
            .selected_record()
            .map(|(record, _)| record.source_url.clone())
        else {
            return;
        };
        if let Err(err) = open_source(&url) {
            tracing::warn!(?err, "failed to open posting");
            self.state
                .set_status_message(Some(format!("Could not open link: {err}")));
        }
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) -> bool {
        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        match self.state.overlay.clone() {
            Some(Overlay::Facets { cursor }) => {
                let items = state::facet_items();
                match key.code {
                    KeyCode::Esc | KeyCode::Char('f') | KeyCode::Char('q') => {
                        self.state.close_overlay();
                    }
                    KeyCode::Char('j') | KeyCode::Down => {
                        let next = (cursor + 1).min(items.len().saturating_sub(1));
                        self.state.overlay = Some(Overlay::Facets { cursor: next });
                    }
                    KeyCode::Char('k') | KeyCode::Up => {
                        self.state.overlay = Some(Overlay::Facets {
                            cursor: cursor.saturating_sub(1),
                        });
                    }
                    KeyCode::Char(' ') | KeyCode::Enter => {
                        if let Some(item) = items.get(cursor) {
                            self.state.toggle_facet(*item);
                        }
                    }
                    _ => {}
                }
                true
            }
            Some(Overlay::Meta(_)) => {
                match key.code {
                    KeyCode::Esc => {
                        self.state.close_overlay();
                        self.state.set_status_message(Some("Edit canceled"));
                    }
                    KeyCode::Enter => self.submit_meta_editor(),
                    KeyCode::Tab | KeyCode::BackTab => {
                        if let Some(editor) = self.state.meta_editor_mut() {
                            editor.field = match editor.field {
                                MetaField::Tags => MetaField::Note,
                                MetaField::Note => MetaField::Tags,
                            };
                        }
                    }
                    KeyCode::Backspace => {
                        if let Some(editor) = self.state.meta_editor_mut() {
                            state::pop_grapheme(editor.active_input_mut());
                        }
                    }
                    KeyCode::Char(ch) if plain => {
                        if let Some(editor) = self.state.meta_editor_mut() {
                            editor.active_input_mut().push(ch);
                        }
                    }
                    _ => {}
                }
                true
            }
            Some(Overlay::Help) => {
                self.state.close_overlay();
                true
            }
            None => false,
        }
    }

    fn submit_meta_editor(&mut self) {
        let Some(Overlay::Meta(editor)) = self.state.overlay.take() else {
            return;
        };
        let mut dispatcher = ActionDispatcher::new(&mut self.state.bookmarks);
        match dispatcher.save_meta(&editor.identity, &editor.tags, &editor.note) {
            Ok(()) => {
                self.state.bookmarks_changed();
                self.state.set_status_message(Some("Bookmark saved"));
            }
            Err(err) => {
                tracing::error!(?err, "failed to save bookmark details");
                self.state
                    .set_status_message(Some("Failed to save bookmark"));
                self.state.overlay = Some(Overlay::Meta(editor));
            }
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("restoring screen state")?;
    Ok(())
}
