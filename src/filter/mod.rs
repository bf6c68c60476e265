use std::cmp::Ordering;
use std::collections::BTreeSet;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use time::{Date, Duration};

use crate::bookmarks::BookmarkLookup;
use crate::model::{Record, RecordIdentity};
use crate::search::{parse_query, RecordText};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum RegionFacet {
    Seoul,
    Gyeonggi,
    Incheon,
    Busan,
    Daegu,
    Gwangju,
    Daejeon,
    Ulsan,
    Sejong,
    Gangwon,
    Chungbuk,
    Chungnam,
    Jeonbuk,
    Jeonnam,
    Gyeongbuk,
    Gyeongnam,
    Jeju,
}

impl RegionFacet {
    /// Substring looked up in the upstream region list.
    pub fn search_term(self) -> &'static str {
        match self {
            RegionFacet::Seoul => "서울",
            RegionFacet::Gyeonggi => "경기",
            RegionFacet::Incheon => "인천",
            RegionFacet::Busan => "부산",
            RegionFacet::Daegu => "대구",
            RegionFacet::Gwangju => "광주",
            RegionFacet::Daejeon => "대전",
            RegionFacet::Ulsan => "울산",
            RegionFacet::Sejong => "세종",
            RegionFacet::Gangwon => "강원",
            RegionFacet::Chungbuk => "충북",
            RegionFacet::Chungnam => "충남",
            RegionFacet::Jeonbuk => "전북",
            RegionFacet::Jeonnam => "전남",
            RegionFacet::Gyeongbuk => "경북",
            RegionFacet::Gyeongnam => "경남",
            RegionFacet::Jeju => "제주",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum HireTypeFacet {
    Regular,
    PermanentContract,
    NonRegular,
    Intern,
}

impl HireTypeFacet {
    pub fn search_term(self) -> &'static str {
        match self {
            HireTypeFacet::Regular => "정규직",
            HireTypeFacet::PermanentContract => "무기계약",
            HireTypeFacet::NonRegular => "비정규",
            HireTypeFacet::Intern => "인턴",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum SortKey {
    /// Upstream order.
    #[default]
    Default,
    /// Newest posting start first.
    Latest,
    /// Earliest end date first.
    Deadline,
}

impl SortKey {
    pub fn next(self) -> Self {
        match self {
            SortKey::Default => SortKey::Latest,
            SortKey::Latest => SortKey::Deadline,
            SortKey::Deadline => SortKey::Default,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum View {
    #[default]
    All,
    Bookmarked,
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct DateFlags: u8 {
        const EXCLUDE_CLOSED = 0b001;
        const DUE_WITHIN_WEEK = 0b010;
        const POSTED_TODAY = 0b100;
    }
}

const DUE_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    pub query: String,
    pub regions: BTreeSet<RegionFacet>,
    pub hire_types: BTreeSet<HireTypeFacet>,
    pub sort: SortKey,
    pub flags: DateFlags,
    pub view: View,
}

impl FilterState {
    pub fn with_sort(sort: SortKey) -> Self {
        Self {
            sort,
            ..Self::default()
        }
    }

    pub fn toggle_region(&mut self, facet: RegionFacet) {
        if !self.regions.remove(&facet) {
            self.regions.insert(facet);
        }
    }

    pub fn toggle_hire_type(&mut self, facet: HireTypeFacet) {
        if !self.hire_types.remove(&facet) {
            self.hire_types.insert(facet);
        }
    }

    pub fn toggle_flag(&mut self, flag: DateFlags) {
        self.flags.toggle(flag);
    }

    /// Short labels for the active constraints, used by the status line.
    pub fn chips(&self) -> Vec<String> {
        let mut chips = Vec::new();
        if self.view == View::Bookmarked {
            chips.push("★ only".to_string());
        }
        chips.extend(self.regions.iter().map(|r| format!("region:{r}")));
        chips.extend(self.hire_types.iter().map(|h| format!("type:{h}")));
        if self.flags.contains(DateFlags::EXCLUDE_CLOSED) {
            chips.push("open".to_string());
        }
        if self.flags.contains(DateFlags::DUE_WITHIN_WEEK) {
            chips.push("due≤7d".to_string());
        }
        if self.flags.contains(DateFlags::POSTED_TODAY) {
            chips.push("today".to_string());
        }
        if self.sort != SortKey::Default {
            chips.push(format!("sort:{}", self.sort));
        }
        chips
    }
}

/// Returns indices into `records` in display order.
///
/// Pure and deterministic for fixed inputs. Every sort is stable, so equal
/// keys keep their upstream order.
pub fn apply<B>(records: &[Record], state: &FilterState, bookmarks: &B, today: Date) -> Vec<usize>
where
    B: BookmarkLookup + ?Sized,
{
    let query = parse_query(&state.query);
    let mut scored: Vec<(usize, u32)> = Vec::new();

    for (index, record) in records.iter().enumerate() {
        if state.view == View::Bookmarked && !bookmarks.is_bookmarked(&RecordIdentity::of(record)) {
            continue;
        }
        if !passes_facets(record, state) || !passes_flags(record, state.flags, today) {
            continue;
        }
        if query.is_empty() {
            scored.push((index, 0));
            continue;
        }
        let text = RecordText::of(record);
        if !text.matches(&query) {
            continue;
        }
        let score = if query.has_inclusions() {
            text.score(&query)
        } else {
            0
        };
        scored.push((index, score));
    }

    if query.has_inclusions() {
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        return scored.into_iter().map(|(index, _)| index).collect();
    }

    let mut indices: Vec<usize> = scored.into_iter().map(|(index, _)| index).collect();
    match state.sort {
        SortKey::Default => {}
        SortKey::Deadline => {
            indices.sort_by(|&a, &b| unknown_last(records[a].end_date(), records[b].end_date(), false))
        }
        SortKey::Latest => indices
            .sort_by(|&a, &b| unknown_last(records[a].begin_date(), records[b].begin_date(), true)),
    }
    indices
}

fn unknown_last(a: Option<Date>, b: Option<Date>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) if descending => b.cmp(&a),
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn passes_facets(record: &Record, state: &FilterState) -> bool {
    if !state.regions.is_empty() {
        let regions = record.regions.to_lowercase();
        if !state
            .regions
            .iter()
            .any(|facet| regions.contains(facet.search_term()))
        {
            return false;
        }
    }
    if !state.hire_types.is_empty() {
        let hire_types = record.hire_types.to_lowercase();
        if !state
            .hire_types
            .iter()
            .any(|facet| hire_types.contains(facet.search_term()))
        {
            return false;
        }
    }
    true
}

fn passes_flags(record: &Record, flags: DateFlags, today: Date) -> bool {
    if flags.contains(DateFlags::EXCLUDE_CLOSED) && record.is_closed(today) {
        return false;
    }
    if flags.contains(DateFlags::DUE_WITHIN_WEEK) {
        let Some(end) = record.end_date() else {
            return false;
        };
        let horizon = today.checked_add(Duration::days(DUE_WINDOW_DAYS));
        if end < today || horizon.map(|h| end > h).unwrap_or(false) {
            return false;
        }
    }
    if flags.contains(DateFlags::POSTED_TODAY) && record.begin_date() != Some(today) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sample;
    use std::collections::HashSet;
    use std::str::FromStr;
    use time::macros::date;

    const TODAY: Date = date!(2026 - 02 - 20);

    fn dated(title: &str, begin: &str, end: &str) -> Record {
        let mut record = sample(title, "Agency", "서울", "정규직");
        record.begin_ymd = begin.into();
        record.end_ymd = end.into();
        record
    }

    fn titles(records: &[Record], indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| records[i].title.clone()).collect()
    }

    fn no_bookmarks() -> HashSet<RecordIdentity> {
        HashSet::new()
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let out = apply(&[], &FilterState::default(), &no_bookmarks(), TODAY);
        assert!(out.is_empty());
    }

    #[test]
    fn default_sort_preserves_upstream_order() {
        let records = vec![dated("b", "", ""), dated("a", "", ""), dated("c", "", "")];
        let out = apply(&records, &FilterState::default(), &no_bookmarks(), TODAY);
        assert_eq!(out, vec![0, 1, 2]);
    }

    #[test]
    fn deadline_sort_puts_unknown_last() {
        let records = vec![
            dated("none", "", ""),
            dated("late", "", "20260310"),
            dated("bad", "", "2026-03-01"),
            dated("early", "", "20260221"),
        ];
        let state = FilterState::with_sort(SortKey::Deadline);
        let out = apply(&records, &state, &no_bookmarks(), TODAY);
        assert_eq!(titles(&records, &out), vec!["early", "late", "none", "bad"]);
    }

    #[test]
    fn latest_sort_is_descending_with_unknown_last() {
        let records = vec![
            dated("old", "20260101", ""),
            dated("none", "", ""),
            dated("new", "20260219", ""),
            dated("new-too", "20260219", ""),
        ];
        let state = FilterState::with_sort(SortKey::Latest);
        let out = apply(&records, &state, &no_bookmarks(), TODAY);
        assert_eq!(titles(&records, &out), vec!["new", "new-too", "old", "none"]);
    }

    #[test]
    fn region_facet_matches_any_selected() {
        let records = vec![
            sample("a", "x", "서울, 경기", "정규직"),
            sample("b", "x", "부산", "정규직"),
            sample("c", "x", "경기", "인턴"),
        ];
        let mut state = FilterState::default();
        state.toggle_region(RegionFacet::Seoul);
        assert_eq!(apply(&records, &state, &no_bookmarks(), TODAY), vec![0]);
        state.toggle_region(RegionFacet::Gyeonggi);
        assert_eq!(apply(&records, &state, &no_bookmarks(), TODAY), vec![0, 2]);
        state.toggle_hire_type(HireTypeFacet::Intern);
        assert_eq!(apply(&records, &state, &no_bookmarks(), TODAY), vec![2]);
    }

    #[test]
    fn date_flags_treat_unknown_dates_as_open() {
        let records = vec![
            dated("closed", "", "20260219"),
            dated("unknown", "garbage", ""),
            dated("closing", "20260220", "20260220"),
            dated("week", "", "20260227"),
            dated("later", "", "20260228"),
        ];
        let mut state = FilterState::default();
        state.toggle_flag(DateFlags::EXCLUDE_CLOSED);
        assert_eq!(
            titles(&records, &apply(&records, &state, &no_bookmarks(), TODAY)),
            vec!["unknown", "closing", "week", "later"]
        );

        let mut state = FilterState::default();
        state.toggle_flag(DateFlags::DUE_WITHIN_WEEK);
        assert_eq!(
            titles(&records, &apply(&records, &state, &no_bookmarks(), TODAY)),
            vec!["closing", "week"]
        );

        let mut state = FilterState::default();
        state.toggle_flag(DateFlags::POSTED_TODAY);
        assert_eq!(
            titles(&records, &apply(&records, &state, &no_bookmarks(), TODAY)),
            vec!["closing"]
        );
    }

    #[test]
    fn bookmarked_view_uses_lookup() {
        let mut records = vec![sample("a", "x", "", ""), sample("b", "x", "", "")];
        records[1].source_url = "https://example.org/b".into();
        let mut marked = HashSet::new();
        marked.insert(records[1].identity());
        let state = FilterState {
            view: View::Bookmarked,
            ..FilterState::default()
        };
        assert_eq!(apply(&records, &state, &marked, TODAY), vec![1]);
    }

    #[test]
    fn query_scores_override_explicit_sort() {
        let records = vec![
            dated("Analyst", "", "20260201"),
            dated("Seoul intern", "", "20260301"),
        ];
        let mut state = FilterState::with_sort(SortKey::Deadline);
        state.query = "seoul".into();
        assert_eq!(apply(&records, &state, &no_bookmarks(), TODAY), vec![1]);

        state.query = "agency".into();
        let out = apply(&records, &state, &no_bookmarks(), TODAY);
        assert_eq!(out, vec![0, 1], "equal scores keep upstream order, not deadline order");
    }

    #[test]
    fn exclusion_only_query_filters_without_scoring() {
        let records = vec![
            dated("b Intern", "", "20260301"),
            dated("a Regular", "", "20260225"),
        ];
        let mut state = FilterState::with_sort(SortKey::Deadline);
        state.query = "-intern".into();
        assert_eq!(apply(&records, &state, &no_bookmarks(), TODAY), vec![1]);
    }

    #[test]
    fn facets_parse_from_cli_strings() {
        assert_eq!(RegionFacet::from_str("seoul"), Ok(RegionFacet::Seoul));
        assert_eq!(HireTypeFacet::from_str("Permanent-Contract"), Ok(HireTypeFacet::PermanentContract));
        assert_eq!(SortKey::from_str("deadline"), Ok(SortKey::Deadline));
        assert!(RegionFacet::from_str("atlantis").is_err());
        assert_eq!(RegionFacet::Gyeonggi.to_string(), "gyeonggi");
    }

    #[test]
    fn filter_state_round_trips_through_json() {
        let mut state = FilterState::with_sort(SortKey::Latest);
        state.toggle_region(RegionFacet::Busan);
        state.toggle_flag(DateFlags::EXCLUDE_CLOSED | DateFlags::POSTED_TODAY);
        state.query = "data -intern".into();
        let raw = serde_json::to_string(&state).expect("serialize");
        let back: FilterState = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(back, state);
    }
}
