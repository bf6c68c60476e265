use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{self, Read};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime};

use crate::app::App;
use crate::bookmarks::{split_tag_input, BookmarkStore};
use crate::filter::{self, DateFlags, FilterState, HireTypeFacet, RegionFacet, SortKey, View};
use crate::history::RecentSearches;
use crate::model::{format_ymd, Record, RecordIdentity};
use crate::offline::{CacheRequest, Network, OfflineCache};
use crate::source::{load_snapshot, load_with_fallback, JobSource, LoadOrigin};
use crate::storage::SharedStore;

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Search terms; prefix a word with '-' to exclude it
    #[arg()]
    pub query: Vec<String>,
    /// Restrict to a region (repeatable), e.g. seoul, busan, gyeonggi
    #[arg(long = "region")]
    pub regions: Vec<RegionFacet>,
    /// Restrict to a hire type (repeatable): regular, permanent-contract, non-regular, intern
    #[arg(long = "hire-type")]
    pub hire_types: Vec<HireTypeFacet>,
    /// Ordering when no search terms are given: default, latest, deadline
    #[arg(long)]
    pub sort: Option<SortKey>,
    /// Hide postings whose end date has passed
    #[arg(long)]
    pub exclude_closed: bool,
    /// Only postings closing within seven days
    #[arg(long)]
    pub due_soon: bool,
    /// Only postings that opened today
    #[arg(long)]
    pub posted_today: bool,
    /// Only bookmarked postings
    #[arg(long)]
    pub bookmarked: bool,
    /// Use the stored snapshot instead of the network
    #[arg(long)]
    pub offline: bool,
    /// Limit the number of results printed
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

impl ListArgs {
    fn filter_state(&self, default_sort: SortKey) -> FilterState {
        let mut flags = DateFlags::empty();
        flags.set(DateFlags::EXCLUDE_CLOSED, self.exclude_closed);
        flags.set(DateFlags::DUE_WITHIN_WEEK, self.due_soon);
        flags.set(DateFlags::POSTED_TODAY, self.posted_today);
        FilterState {
            query: self.query.join(" "),
            regions: self.regions.iter().copied().collect(),
            hire_types: self.hire_types.iter().copied().collect(),
            sort: self.sort.unwrap_or(default_sort),
            flags,
            view: if self.bookmarked {
                View::Bookmarked
            } else {
                View::All
            },
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum BookmarkCommand {
    /// Bookmark a posting, or remove an existing bookmark with its tags and note
    Toggle(IdentityArgs),
    /// List bookmarks with their tags and notes
    List,
    /// Replace the tags of a bookmark (creates it when missing)
    Tag(BookmarkTagArgs),
    /// Replace the note of a bookmark; reads stdin when no text is given
    Note(BookmarkNoteArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BookmarkArgs {
    #[command(subcommand)]
    pub command: BookmarkCommand,
}

#[derive(Args, Debug, Clone)]
pub struct IdentityArgs {
    /// Posting source URL as printed by `list`
    pub identity: String,
}

#[derive(Args, Debug, Clone)]
pub struct BookmarkTagArgs {
    /// Posting source URL as printed by `list`
    pub identity: String,
    /// Tags, space or comma separated
    pub tags: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct BookmarkNoteArgs {
    /// Posting source URL as printed by `list`
    pub identity: String,
    /// Note text
    pub note: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RecentArgs {
    /// Forget all recent searches
    #[arg(long)]
    pub clear: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    /// Store the app shell for offline use
    Warm,
    /// Show cached entries of the active cache version
    List,
    /// Drop every offline cache entry
    Clear,
    /// Fetch a path through the offline cache, e.g. /index.html
    Get(CacheGetArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CacheGetArgs {
    pub path: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    pub page: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

pub fn run_tui(app: &mut App) -> Result<()> {
    app.run()
}

pub fn list_jobs(
    source: &dyn JobSource,
    store: SharedStore,
    default_sort: SortKey,
    today: Date,
    fallback: bool,
    args: ListArgs,
) -> Result<()> {
    let output = run_list(source, store, default_sort, today, fallback, &args)?;
    print!("{output}");
    Ok(())
}

fn run_list(
    source: &dyn JobSource,
    store: SharedStore,
    default_sort: SortKey,
    today: Date,
    fallback: bool,
    args: &ListArgs,
) -> Result<String> {
    let outcome = load_with_fallback(source, &*store, fallback).context("loading job listings")?;
    let bookmarks = BookmarkStore::load(store.clone())?;
    let state = args.filter_state(default_sort);
    if !state.query.trim().is_empty() {
        let mut recent = RecentSearches::load(store, crate::history::RECENT_SEARCH_LIMIT);
        if let Err(err) = recent.record(&state.query) {
            tracing::warn!(?err, "failed to record recent search");
        }
    }
    let indices = filter::apply(&outcome.records, &state, &bookmarks, today);

    let mut out = String::new();
    if let LoadOrigin::Snapshot { saved_at, error } = &outcome.origin {
        let _ = writeln!(
            &mut out,
            "(offline copy from {}: {error})\n",
            format_timestamp(*saved_at)
        );
    }
    out.push_str(&format_records(
        &outcome.records,
        &indices,
        &bookmarks,
        today,
        args.limit,
    ));
    Ok(out)
}

fn format_records(
    records: &[Record],
    indices: &[usize],
    bookmarks: &BookmarkStore,
    today: Date,
    limit: usize,
) -> String {
    if indices.is_empty() {
        return "No matching jobs.\n".to_string();
    }
    let mut out = String::new();
    for &index in indices.iter().take(limit) {
        let record = &records[index];
        let identity = record.identity();
        let mut headline = record.title.trim().to_string();
        if bookmarks.has(&identity) {
            headline.insert_str(0, "★ ");
        }
        if record.is_closed(today) {
            headline.push_str("  [CLOSED]");
        }
        let _ = writeln!(&mut out, "{headline}");
        let _ = writeln!(
            &mut out,
            "    {}  {}  {}",
            record.organization.trim(),
            record.regions.trim(),
            record.hire_types.trim()
        );
        let _ = writeln!(
            &mut out,
            "    {} ~ {}",
            format_ymd(&record.begin_ymd),
            format_ymd(&record.end_ymd)
        );
        let _ = writeln!(&mut out, "    {identity}");
        out.push('\n');
    }
    if indices.len() > limit {
        let _ = writeln!(&mut out, "... {} more", indices.len() - limit);
    }
    out
}

pub fn handle_bookmark_command(store: SharedStore, args: BookmarkArgs) -> Result<()> {
    let output = run_bookmark(store, args.command, read_stdin)?;
    print!("{output}");
    Ok(())
}

fn run_bookmark<F>(store: SharedStore, command: BookmarkCommand, stdin: F) -> Result<String>
where
    F: FnOnce() -> Result<Option<String>>,
{
    let mut bookmarks = BookmarkStore::load(store.clone())?;
    match command {
        BookmarkCommand::Toggle(args) => {
            let identity = parse_identity(&args.identity)?;
            let saved = bookmarks.toggle(&identity)?;
            Ok(if saved {
                format!("Bookmarked {identity}\n")
            } else {
                format!("Removed bookmark {identity}\n")
            })
        }
        BookmarkCommand::List => Ok(format_bookmarks(&bookmarks, &titles_from_snapshot(&store))),
        BookmarkCommand::Tag(args) => {
            let identity = parse_identity(&args.identity)?;
            let tags: Vec<String> = args
                .tags
                .iter()
                .flat_map(|raw| split_tag_input(raw))
                .flat_map(|tag| {
                    tag.split_whitespace()
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .collect();
            let note = bookmarks
                .get(&identity)
                .map(|bookmark| bookmark.note.clone())
                .unwrap_or_default();
            bookmarks.set_meta(&identity, &tags, &note)?;
            let stored = bookmarks
                .get(&identity)
                .map(|bookmark| format_tags(bookmark.tags.iter()))
                .unwrap_or_default();
            Ok(format!("Tags for {identity}: {stored}\n"))
        }
        BookmarkCommand::Note(args) => {
            let identity = parse_identity(&args.identity)?;
            let note = match args.note {
                Some(note) => note,
                None => stdin()?.unwrap_or_default(),
            };
            let tags: Vec<String> = bookmarks
                .get(&identity)
                .map(|bookmark| bookmark.tags.iter().cloned().collect())
                .unwrap_or_default();
            bookmarks.set_meta(&identity, &tags, &note)?;
            Ok(format!("Note saved for {identity}\n"))
        }
    }
}

fn parse_identity(raw: &str) -> Result<RecordIdentity> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("posting identity cannot be empty");
    }
    Ok(RecordIdentity::from(trimmed))
}

fn titles_from_snapshot(store: &SharedStore) -> HashMap<RecordIdentity, String> {
    match load_snapshot(&**store) {
        Ok(Some(snapshot)) => snapshot
            .records
            .iter()
            .map(|record| (record.identity(), record.title.trim().to_string()))
            .collect(),
        Ok(None) => HashMap::new(),
        Err(err) => {
            tracing::warn!(?err, "records snapshot unreadable");
            HashMap::new()
        }
    }
}

fn format_bookmarks(bookmarks: &BookmarkStore, titles: &HashMap<RecordIdentity, String>) -> String {
    if bookmarks.count() == 0 {
        return "No bookmarks yet.\n".to_string();
    }
    let mut out = String::new();
    for (identity, bookmark) in bookmarks.iter() {
        let title = titles
            .get(identity)
            .map(String::as_str)
            .unwrap_or("(not in last snapshot)");
        let _ = writeln!(&mut out, "★ {title}");
        let _ = writeln!(&mut out, "    {identity}");
        let _ = writeln!(
            &mut out,
            "    saved   {}",
            format_timestamp(bookmark.saved_at / 1000)
        );
        if !bookmark.tags.is_empty() {
            let _ = writeln!(&mut out, "    tags    {}", format_tags(bookmark.tags.iter()));
        }
        if !bookmark.note.is_empty() {
            let _ = writeln!(&mut out, "    note    {}", bookmark.note);
        }
        out.push('\n');
    }
    out
}

pub fn handle_recent_command(store: SharedStore, limit: usize, args: RecentArgs) -> Result<()> {
    let output = run_recent(store, limit, &args)?;
    print!("{output}");
    Ok(())
}

fn run_recent(store: SharedStore, limit: usize, args: &RecentArgs) -> Result<String> {
    let mut recent = RecentSearches::load(store, limit);
    if args.clear {
        recent.clear()?;
        return Ok("Recent searches cleared.\n".to_string());
    }
    if recent.entries().is_empty() {
        return Ok("No recent searches.\n".to_string());
    }
    let mut out = String::new();
    for (index, query) in recent.entries().iter().enumerate() {
        let _ = writeln!(&mut out, "{:>2}. {query}", index + 1);
    }
    Ok(out)
}

pub fn handle_cache_command<N: Network + ?Sized>(
    cache: &OfflineCache,
    network: &N,
    args: CacheArgs,
) -> Result<()> {
    let output = run_cache(cache, network, args.command)?;
    print!("{output}");
    Ok(())
}

fn run_cache<N: Network + ?Sized>(
    cache: &OfflineCache,
    network: &N,
    command: CacheCommand,
) -> Result<String> {
    match command {
        CacheCommand::Warm => {
            let stored = cache.precache(network);
            Ok(format!(
                "Cached {stored} shell asset(s) in {}\n",
                cache.version()
            ))
        }
        CacheCommand::List => {
            let entries = cache.entries()?;
            if entries.is_empty() {
                return Ok(format!("Cache {} is empty.\n", cache.version()));
            }
            let mut out = String::new();
            for (url, stored_at) in entries {
                let _ = writeln!(&mut out, "{url}  {}", format_timestamp(stored_at));
            }
            Ok(out)
        }
        CacheCommand::Clear => {
            let removed = cache.clear()?;
            Ok(format!("Removed {removed} cached entr{}\n", if removed == 1 { "y" } else { "ies" }))
        }
        CacheCommand::Get(args) => {
            let url = cache.url_for(&args.path);
            let request = if args.page {
                CacheRequest::navigation(url)
            } else {
                CacheRequest::get(url)
            };
            let served = cache.respond(&request, network)?;
            let refreshed = cache.revalidate_pending(network);
            let mut out = format!(
                "{} {} ({:?}, {} bytes)\n",
                served.response.status,
                request.url,
                served.origin,
                served.response.body.len()
            );
            if refreshed > 0 {
                let _ = writeln!(&mut out, "Refreshed {refreshed} cached entr{}", if refreshed == 1 { "y" } else { "ies" });
            }
            Ok(out)
        }
    }
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("reading note from stdin")?;
    Ok(Some(buf))
}

fn format_tags<'a>(tags: impl Iterator<Item = &'a String>) -> String {
    tags.map(|tag| format!("#{tag}")).collect::<Vec<_>>().join(" ")
}

fn format_timestamp(epoch: i64) -> String {
    OffsetDateTime::from_unix_timestamp(epoch)
        .map(|dt| dt.format(&Rfc3339).unwrap_or_else(|_| epoch.to_string()))
        .unwrap_or_else(|_| epoch.to_string())
}
