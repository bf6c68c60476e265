use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;
use regex::Regex;
use thiserror::Error;
use time::OffsetDateTime;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::app::state::{facet_items, AppState, FacetItem, LoadState, MetaField, Overlay};
use crate::config::themes::Palette;
use crate::filter::{SortKey, View};
use crate::highlight::segments;
use crate::model::{format_ymd, Record, RecordIdentity};

pub use crate::app::state::card_height;

const MIN_WIDTH: u16 = 24;
const MIN_LIST_HEIGHT: u16 = 3;

/// The list mount point does not fit the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("terminal too small for the job list ({width}x{height})")]
pub struct MissingRegion {
    pub width: u16,
    pub height: u16,
}

struct Regions {
    header: Rect,
    search: Rect,
    list: Rect,
    status: Rect,
}

fn layout(area: Rect) -> Result<Regions, MissingRegion> {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(MIN_LIST_HEIGHT + 2),
            Constraint::Length(1),
        ])
        .split(area);
    let list = chunks[2];
    if area.width < MIN_WIDTH || list.height < MIN_LIST_HEIGHT + 2 {
        return Err(MissingRegion {
            width: area.width,
            height: area.height,
        });
    }
    Ok(Regions {
        header: chunks[0],
        search: chunks[1],
        list,
        status: chunks[3],
    })
}

/// Lines available to cards inside the bordered list block.
pub fn list_viewport_height(area: Rect) -> Result<u16, MissingRegion> {
    layout(area).map(|regions| regions.list.height.saturating_sub(2))
}

pub fn draw_app(frame: &mut Frame, state: &AppState, palette: &Palette) {
    let regions = match layout(frame.size()) {
        Ok(regions) => regions,
        Err(missing) => {
            let fallback = Paragraph::new(format!(
                "{} jobs. {missing}. Enlarge the window or press q.",
                state.filtered.len()
            ))
            .style(Style::default().fg(palette.error))
            .wrap(Wrap { trim: true });
            frame.render_widget(fallback, frame.size());
            return;
        }
    };

    frame.render_widget(Paragraph::new(header_line(state, palette)), regions.header);
    frame.render_widget(Paragraph::new(search_line(state, palette)), regions.search);
    draw_list(frame, state, palette, regions.list);
    frame.render_widget(Paragraph::new(status_line(state, palette)), regions.status);

    render_overlay(frame, state, palette);
}

fn header_line(state: &AppState, palette: &Palette) -> Line<'static> {
    let sort = match state.filter.sort {
        SortKey::Default => "default",
        SortKey::Latest => "latest",
        SortKey::Deadline => "deadline",
    };
    let mut spans = vec![
        Span::styled(
            format!("Jobs {}/{}", state.filtered.len(), state.records.len()),
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  ★ {}", state.bookmarks.count()),
            Style::default().fg(palette.star),
        ),
        Span::styled(format!("  sort: {sort}"), Style::default().fg(palette.muted)),
    ];
    if state.filter.view == View::Bookmarked {
        spans.push(Span::styled(
            "  [bookmarked]",
            Style::default()
                .fg(palette.star)
                .add_modifier(Modifier::BOLD),
        ));
    }
    for chip in state.filter.chips() {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(
            format!("[{chip}]"),
            Style::default().fg(palette.accent),
        ));
    }
    Line::from(spans)
}

fn search_line(state: &AppState, palette: &Palette) -> Line<'static> {
    if state.search.active {
        let mut spans = vec![
            Span::styled("/ ", Style::default().fg(palette.accent)),
            Span::styled(format!("{}▌", state.search.draft), Style::default().fg(palette.text)),
        ];
        if state.search.draft.is_empty() && !state.recent.entries().is_empty() {
            spans.push(Span::styled(
                format!("  recent: {}", state.recent.entries().join(" | ")),
                Style::default().fg(palette.muted),
            ));
        }
        return Line::from(spans);
    }
    if state.filter.query.is_empty() {
        Line::from(Span::styled(
            "Press / to search, f for filters, ? for help",
            Style::default().fg(palette.muted),
        ))
    } else {
        Line::from(vec![
            Span::styled("Search: ", Style::default().fg(palette.muted)),
            Span::styled(state.filter.query.clone(), Style::default().fg(palette.text)),
        ])
    }
}

fn draw_list(frame: &mut Frame, state: &AppState, palette: &Palette, area: Rect) {
    let window = state.list.window();
    let title = if window.is_empty() {
        " Listings ".to_string()
    } else {
        format!(" Listings {}-{} ", window.start + 1, window.end)
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.muted));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if let Some(panel) = placeholder(state, palette) {
        frame.render_widget(panel.wrap(Wrap { trim: true }), inner);
        return;
    }

    let width = usize::from(inner.width);
    let mut lines: Vec<Line<'static>> = Vec::new();
    for row in state.list.rows() {
        let Some((record, identity)) = state.record_at(row.position) else {
            continue;
        };
        let selected = row.position == state.selected;
        lines.extend(card_lines(state, palette, record, identity, selected, width));
    }
    let offset = u16::try_from(state.list.scroll_offset()).unwrap_or(u16::MAX);
    frame.render_widget(Paragraph::new(lines).scroll((offset, 0)), inner);
}

fn placeholder(state: &AppState, palette: &Palette) -> Option<Paragraph<'static>> {
    if !state.is_empty() {
        return None;
    }
    let (text, color) = match &state.load {
        LoadState::Loading => ("Loading listings...".to_string(), palette.muted),
        LoadState::Failed(err) => (
            format!("Could not load listings.\n{err}\nPress r to retry."),
            palette.error,
        ),
        LoadState::Ready | LoadState::Stale { .. } if state.records.is_empty() => {
            ("No listings available.".to_string(), palette.muted)
        }
        LoadState::Ready | LoadState::Stale { .. } => {
            ("No matching jobs. Press x to clear filters.".to_string(), palette.muted)
        }
    };
    Some(Paragraph::new(text).style(Style::default().fg(color)))
}

/// Exactly [`card_height`] lines per record.
fn card_lines(
    state: &AppState,
    palette: &Palette,
    record: &Record,
    identity: &RecordIdentity,
    selected: bool,
    width: usize,
) -> Vec<Line<'static>> {
    let base = if selected {
        Style::default().fg(palette.text).bg(palette.selection_bg)
    } else {
        Style::default().fg(palette.text)
    };
    let muted = base.fg(palette.muted);
    let mark = base.fg(palette.highlight).add_modifier(Modifier::BOLD);
    let highlighter = state.highlighter();
    let bookmark = state.bookmarks.get(identity);

    let mut title = vec![Span::styled(if selected { "▶ " } else { "  " }, base.fg(palette.accent))];
    if bookmark.is_some() {
        title.push(Span::styled("★ ", base.fg(palette.star)));
    }
    if state.is_new(identity) {
        title.push(Span::styled(
            "NEW ",
            base.fg(palette.badge_new).add_modifier(Modifier::BOLD),
        ));
    }
    let used: usize = title.iter().map(Span::width).sum();
    title.extend(highlighted(
        &fit_width(&record.title, width.saturating_sub(used)),
        highlighter,
        base.add_modifier(Modifier::BOLD),
        mark,
    ));

    let details = [
        record.organization.as_str(),
        record.regions.as_str(),
        record.hire_types.as_str(),
    ]
    .into_iter()
    .map(str::trim)
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" · ");
    let mut second = vec![Span::styled("  ", base)];
    second.extend(highlighted(
        &fit_width(&details, width.saturating_sub(2)),
        highlighter,
        muted,
        mark,
    ));

    let mut third = vec![Span::styled(
        format!(
            "  {} ~ {}  ",
            format_ymd(&record.begin_ymd),
            format_ymd(&record.end_ymd)
        ),
        muted,
    )];
    third.push(deadline_badge(record, state, palette, base));
    if !record.category.trim().is_empty() {
        third.push(Span::styled(format!("  {}", record.category.trim()), muted));
    }

    let mut lines = vec![Line::from(title), Line::from(second), Line::from(third)];
    if let Some(bookmark) = bookmark.filter(|bookmark| bookmark.has_meta()) {
        let tags = bookmark
            .tags
            .iter()
            .map(|tag| format!("#{tag}"))
            .collect::<Vec<_>>()
            .join(" ");
        let meta = match (tags.is_empty(), bookmark.note.is_empty()) {
            (false, false) => format!("{tags}  {}", bookmark.note),
            (false, true) => tags,
            _ => bookmark.note.clone(),
        };
        lines.push(Line::from(Span::styled(
            format!("  {}", fit_width(&meta, width.saturating_sub(2))),
            base.fg(palette.star),
        )));
    }
    lines.push(Line::from(""));
    lines
}

fn deadline_badge(record: &Record, state: &AppState, palette: &Palette, base: Style) -> Span<'static> {
    match record.days_until_close(state.today) {
        Some(days) if days < 0 => Span::styled("closed", base.fg(palette.closed)),
        Some(0) => Span::styled(
            "D-day",
            base.fg(palette.closed).add_modifier(Modifier::BOLD),
        ),
        Some(days) if days <= 7 => Span::styled(format!("D-{days}"), base.fg(palette.highlight)),
        Some(days) => Span::styled(format!("D-{days}"), base.fg(palette.muted)),
        None => Span::styled("open", base.fg(palette.muted)),
    }
}

fn highlighted(text: &str, regex: Option<&Regex>, style: Style, mark: Style) -> Vec<Span<'static>> {
    segments(text, regex)
        .into_iter()
        .map(|(part, hit)| Span::styled(part.to_string(), if hit { mark } else { style }))
        .collect()
}

/// Truncates to `width` terminal columns, ending with `…` when cut.
fn fit_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push('…');
    out
}

fn status_line(state: &AppState, palette: &Palette) -> Line<'static> {
    let position = if state.is_empty() {
        "0/0".to_string()
    } else {
        format!("{}/{}", state.selected + 1, state.filtered.len())
    };
    let mut spans = vec![Span::styled(
        position,
        Style::default().fg(palette.text).add_modifier(Modifier::BOLD),
    )];
    match &state.load {
        LoadState::Loading if !state.records.is_empty() => {
            spans.push(Span::styled(" | refreshing", Style::default().fg(palette.muted)));
        }
        LoadState::Stale { saved_at, error } => {
            spans.push(Span::styled(
                format!(" | offline copy from {} ({error})", format_saved_at(*saved_at)),
                Style::default().fg(palette.error),
            ));
        }
        _ => {}
    }
    if let Some(message) = state.status_message() {
        spans.push(Span::styled(
            format!(" | {message}"),
            Style::default().fg(palette.muted),
        ));
    }
    Line::from(spans)
}

fn format_saved_at(saved_at: i64) -> String {
    OffsetDateTime::from_unix_timestamp(saved_at)
        .map(|at| {
            format!(
                "{:04}-{:02}-{:02} {:02}:{:02}",
                at.year(),
                u8::from(at.month()),
                at.day(),
                at.hour(),
                at.minute()
            )
        })
        .unwrap_or_else(|_| saved_at.to_string())
}

fn render_overlay(frame: &mut Frame, state: &AppState, palette: &Palette) {
    match &state.overlay {
        Some(Overlay::Facets { cursor }) => {
            let area = centered_rect(50, 70, frame.size());
            frame.render_widget(Clear, area);
            let mut lines = Vec::new();
            for (index, item) in facet_items().into_iter().enumerate() {
                let checked = if state.facet_selected(item) { "[x]" } else { "[ ]" };
                let label = match item {
                    FacetItem::Region(region) => format!("region  {}", region.search_term()),
                    FacetItem::HireType(hire) => format!("hire    {}", hire.search_term()),
                };
                let style = if index == *cursor {
                    Style::default().fg(palette.text).bg(palette.selection_bg)
                } else {
                    Style::default().fg(palette.text)
                };
                lines.push(Line::from(Span::styled(format!("{checked} {label}"), style)));
            }
            let visible = area.height.saturating_sub(2);
            let scroll = u16::try_from(*cursor)
                .unwrap_or(u16::MAX)
                .saturating_sub(visible.saturating_sub(1));
            let paragraph = Paragraph::new(lines).scroll((scroll, 0)).block(
                Block::default()
                    .title(" Filters: space toggles, Esc closes ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(palette.accent)),
            );
            frame.render_widget(paragraph, area);
        }
        Some(Overlay::Meta(editor)) => {
            let area = centered_rect(60, 40, frame.size());
            frame.render_widget(Clear, area);
            let field_style = |field: MetaField| {
                if editor.field == field {
                    Style::default()
                        .fg(palette.accent)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(palette.muted)
                }
            };
            let cursor = |field: MetaField| if editor.field == field { "▌" } else { "" };
            let paragraph = Paragraph::new(vec![
                Line::from(Span::styled(
                    editor.title.clone(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(vec![
                    Span::styled("Tags: ", field_style(MetaField::Tags)),
                    Span::raw(format!("{}{}", editor.tags, cursor(MetaField::Tags))),
                ]),
                Line::from(vec![
                    Span::styled("Note: ", field_style(MetaField::Note)),
                    Span::raw(format!("{}{}", editor.note, cursor(MetaField::Note))),
                ]),
                Line::from(""),
                Line::from(Span::styled(
                    "Tab switches field • Enter saves • Esc cancels",
                    Style::default().fg(palette.muted),
                )),
            ])
            .block(
                Block::default()
                    .title(" Bookmark ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(palette.star)),
            )
            .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        Some(Overlay::Help) => {
            let area = centered_rect(60, 70, frame.size());
            frame.render_widget(Clear, area);
            let lines: Vec<Line> = HELP
                .iter()
                .map(|(keys, what)| {
                    Line::from(vec![
                        Span::styled(format!("{keys:<12}"), Style::default().fg(palette.accent)),
                        Span::raw(*what),
                    ])
                })
                .collect();
            let paragraph = Paragraph::new(lines).block(
                Block::default()
                    .title(" Keys ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(palette.accent)),
            );
            frame.render_widget(paragraph, area);
        }
        None => {}
    }
}

const HELP: &[(&str, &str)] = &[
    ("j/k ↑/↓", "move selection"),
    ("PgUp/PgDn", "scroll a page"),
    ("Ctrl-u/d", "scroll half a page"),
    ("g/G", "first / last"),
    ("/", "search (-word excludes)"),
    ("f", "region and hire type filters"),
    ("s", "cycle sort"),
    ("c", "hide closed"),
    ("w", "closing within a week"),
    ("t", "posted today"),
    ("b", "all / bookmarked"),
    ("x", "clear filters"),
    ("space", "toggle bookmark"),
    ("e", "edit tags and note"),
    ("o", "open posting"),
    ("r", "refresh"),
    ("q", "quit"),
];

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ]
            .as_ref(),
        )
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::themes::ThemeRegistry;
    use crate::config::{AppConfig, ThemeName};
    use crate::model::sample;
    use crate::source::{LoadOrigin, LoadOutcome};
    use crate::storage::MemoryStore;
    use crate::window::RowMeasure;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;
    use time::macros::date;

    fn loaded_state() -> anyhow::Result<AppState> {
        let mut state = AppState::new(
            &AppConfig::default(),
            MemoryStore::shared(),
            date!(2026 - 02 - 20),
        )?;
        let mut record = sample("Data engineer", "Seoul Metro", "서울", "정규직");
        record.source_url = "https://jobs.example/1".into();
        record.end_ymd = "20260222".into();
        state.apply_outcome(LoadOutcome {
            records: vec![record],
            origin: LoadOrigin::Fresh,
        });
        Ok(state)
    }

    fn palette() -> Palette {
        ThemeRegistry::default().palette(ThemeName::Dark)
    }

    #[test]
    fn card_lines_match_measured_height() -> anyhow::Result<()> {
        let mut state = loaded_state()?;
        let identity = state.identities[0].clone();
        let record = state.records[0].clone();
        let plain = card_lines(&state, &palette(), &record, &identity, true, 40);
        assert_eq!(plain.len() as u16, state.measure().row_height(0));

        state.bookmarks.set_meta(&identity, ["remote"], "ask about visa")?;
        let with_meta = card_lines(&state, &palette(), &record, &identity, false, 40);
        assert_eq!(with_meta.len() as u16, state.measure().row_height(0));
        Ok(())
    }

    #[test]
    fn fit_width_counts_wide_characters() {
        assert_eq!(fit_width("서울특별시", 6), "서울…");
        assert_eq!(fit_width("short", 10), "short");
    }

    #[test]
    fn tiny_terminal_reports_missing_region() {
        assert!(list_viewport_height(Rect::new(0, 0, 10, 4)).is_err());
        assert_eq!(list_viewport_height(Rect::new(0, 0, 80, 24)), Ok(19));
    }

    #[test]
    fn draws_cards_and_badges() -> anyhow::Result<()> {
        let state = loaded_state()?;
        let mut terminal = Terminal::new(TestBackend::new(60, 12))?;
        terminal.draw(|frame| draw_app(frame, &state, &palette()))?;
        let buffer = terminal.backend().buffer();
        let text: String = buffer.content().iter().map(|cell| cell.symbol()).collect();
        assert!(text.contains("Data engineer"));
        assert!(text.contains("D-2"));
        assert!(text.contains("Jobs 1/1"));
        Ok(())
    }

    #[test]
    fn failed_load_shows_error_panel() -> anyhow::Result<()> {
        let mut state = AppState::new(
            &AppConfig::default(),
            MemoryStore::shared(),
            date!(2026 - 02 - 20),
        )?;
        state.apply_failure(crate::source::FetchError::Network("refused".into()));
        let mut terminal = Terminal::new(TestBackend::new(60, 12))?;
        terminal.draw(|frame| draw_app(frame, &state, &palette()))?;
        let text: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(text.contains("Could not load listings."));
        Ok(())
    }
}
