use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};
use time::{Date, Month, OffsetDateTime, UtcOffset};

/// A single recruitment posting, kept in the upstream shape.
///
/// Field names are consumed verbatim from the recruitment API so that stored
/// snapshots round-trip without renaming. Missing or `null` text fields are
/// normalised to empty strings.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "recrutPblntSn", default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<serde_json::Value>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(rename = "recrutPbancTtl", default)]
    pub title: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(rename = "instNm", default)]
    pub organization: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(rename = "srcUrl", default)]
    pub source_url: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(rename = "workRgnNmLst", default)]
    pub regions: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(rename = "hireTypeNmLst", default)]
    pub hire_types: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(rename = "recrutSeNm", default)]
    pub category: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(rename = "pbancBgngYmd", default)]
    pub begin_ymd: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(rename = "pbancEndYmd", default)]
    pub end_ymd: String,
}

impl Record {
    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity::of(self)
    }

    pub fn begin_date(&self) -> Option<Date> {
        parse_ymd(&self.begin_ymd)
    }

    pub fn end_date(&self) -> Option<Date> {
        parse_ymd(&self.end_ymd)
    }

    /// Whether the posting closed before `today`. Unknown end dates count as open.
    pub fn is_closed(&self, today: Date) -> bool {
        self.end_date().map(|end| end < today).unwrap_or(false)
    }

    pub fn days_until_close(&self, today: Date) -> Option<i64> {
        self.end_date().map(|end| (end - today).whole_days())
    }
}

/// Stable key for a record, used for bookmarks and row identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordIdentity(String);

impl RecordIdentity {
    pub fn of(record: &Record) -> Self {
        let url = record.source_url.trim();
        if !url.is_empty() {
            return Self(url.to_string());
        }
        Self(format!(
            "{}|{}|{}|{}",
            record.organization.trim(),
            record.title.trim(),
            record.regions.trim(),
            record.hire_types.trim()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parses an 8-digit `YYYYMMDD` string. Anything else is treated as unknown.
pub fn parse_ymd(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = raw[0..4].parse().ok()?;
    let month: u8 = raw[4..6].parse().ok()?;
    let day: u8 = raw[6..8].parse().ok()?;
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

pub fn format_ymd(raw: &str) -> String {
    match parse_ymd(raw) {
        Some(date) => format!(
            "{:04}-{:02}-{:02}",
            date.year(),
            u8::from(date.month()),
            date.day()
        ),
        None if raw.trim().is_empty() => "-".to_string(),
        None => raw.trim().to_string(),
    }
}

pub fn today_at(offset: UtcOffset) -> Date {
    OffsetDateTime::now_utc().to_offset(offset).date()
}

pub fn utc_offset_from_minutes(minutes: i16) -> UtcOffset {
    let minutes = i32::from(minutes);
    UtcOffset::from_whole_seconds(minutes * 60).unwrap_or(UtcOffset::UTC)
}

#[cfg(test)]
pub(crate) fn sample(title: &str, org: &str, region: &str, hire: &str) -> Record {
    Record {
        title: title.to_string(),
        organization: org.to_string(),
        regions: region.to_string(),
        hire_types: hire.to_string(),
        ..Record::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn parses_eight_digit_dates() {
        assert_eq!(parse_ymd("20260220"), Some(date!(2026 - 02 - 20)));
        assert_eq!(parse_ymd(" 20260101 "), Some(date!(2026 - 01 - 01)));
    }

    #[test]
    fn rejects_malformed_dates() {
        assert_eq!(parse_ymd(""), None);
        assert_eq!(parse_ymd("2026-02-20"), None);
        assert_eq!(parse_ymd("20261340"), None);
        assert_eq!(parse_ymd("2026022"), None);
    }

    #[test]
    fn identity_prefers_source_url() {
        let mut record = sample("Engineer", "Agency", "서울", "정규직");
        record.source_url = "https://example.org/job/1".into();
        assert_eq!(record.identity().as_str(), "https://example.org/job/1");

        record.source_url = "   ".into();
        assert_eq!(record.identity().as_str(), "Agency|Engineer|서울|정규직");
    }

    #[test]
    fn deserializes_upstream_shape_with_nulls() {
        let raw = r#"{
            "recrutPblntSn": 281234,
            "recrutPbancTtl": "2026 채용",
            "instNm": null,
            "workRgnNmLst": "서울,경기",
            "hireTypeNmLst": "정규직",
            "pbancEndYmd": "20260310"
        }"#;
        let record: Record = serde_json::from_str(raw).expect("record");
        assert_eq!(record.title, "2026 채용");
        assert_eq!(record.organization, "");
        assert_eq!(record.source_url, "");
        assert_eq!(record.end_date(), Some(date!(2026 - 03 - 10)));
        assert_eq!(record.begin_date(), None);
    }

    #[test]
    fn closed_and_countdown_use_end_date() {
        let mut record = sample("a", "b", "c", "d");
        record.end_ymd = "20260105".into();
        assert!(record.is_closed(date!(2026 - 01 - 06)));
        assert!(!record.is_closed(date!(2026 - 01 - 05)));
        assert_eq!(record.days_until_close(date!(2026 - 01 - 01)), Some(4));
        record.end_ymd = "garbage".into();
        assert!(!record.is_closed(date!(2030 - 01 - 01)));
    }

    #[test]
    fn formats_known_and_unknown_dates() {
        assert_eq!(format_ymd("20260220"), "2026-02-20");
        assert_eq!(format_ymd(""), "-");
        assert_eq!(format_ymd("soon"), "soon");
    }
}
