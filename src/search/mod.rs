use crate::model::Record;

pub const TITLE_WEIGHT: u32 = 50;
pub const ORGANIZATION_WEIGHT: u32 = 25;
pub const REGION_WEIGHT: u32 = 12;
pub const HIRE_TYPE_WEIGHT: u32 = 10;
pub const FALLBACK_WEIGHT: u32 = 4;

/// Free-text query split into lowercased inclusion and exclusion tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ParsedQuery {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn has_inclusions(&self) -> bool {
        !self.include.is_empty()
    }
}

pub fn parse_query(input: &str) -> ParsedQuery {
    let mut query = ParsedQuery::default();
    for raw in input.split_whitespace() {
        let lowered = raw.to_lowercase();
        if let Some(excluded) = lowered.strip_prefix('-') {
            if !excluded.is_empty() {
                query.exclude.push(excluded.to_string());
            }
            continue;
        }
        query.include.push(lowered);
    }
    query
}

/// Lowercased searchable fields of a record.
#[derive(Debug, Clone)]
pub struct RecordText {
    title: String,
    organization: String,
    regions: String,
    hire_types: String,
    full: String,
}

impl RecordText {
    pub fn of(record: &Record) -> Self {
        let title = record.title.to_lowercase();
        let organization = record.organization.to_lowercase();
        let regions = record.regions.to_lowercase();
        let hire_types = record.hire_types.to_lowercase();
        let category = record.category.to_lowercase();
        let url = record.source_url.to_lowercase();
        let full = [
            title.as_str(),
            organization.as_str(),
            regions.as_str(),
            hire_types.as_str(),
            category.as_str(),
            record.begin_ymd.as_str(),
            record.end_ymd.as_str(),
            url.as_str(),
        ]
        .join(" ");
        Self {
            title,
            organization,
            regions,
            hire_types,
            full,
        }
    }

    /// Rejects on any exclusion token, then requires every inclusion token.
    pub fn matches(&self, query: &ParsedQuery) -> bool {
        if query
            .exclude
            .iter()
            .any(|token| self.full.contains(token.as_str()))
        {
            return false;
        }
        query
            .include
            .iter()
            .all(|token| self.full.contains(token.as_str()))
    }

    /// Relevance for a record that already [`matches`](Self::matches).
    pub fn score(&self, query: &ParsedQuery) -> u32 {
        query.include.iter().map(|token| self.token_score(token)).sum()
    }

    fn token_score(&self, token: &str) -> u32 {
        let mut score = 0;
        if self.title.contains(token) {
            score += TITLE_WEIGHT;
        }
        if self.organization.contains(token) {
            score += ORGANIZATION_WEIGHT;
        }
        if self.regions.contains(token) {
            score += REGION_WEIGHT;
        }
        if self.hire_types.contains(token) {
            score += HIRE_TYPE_WEIGHT;
        }
        if score == 0 && self.full.contains(token) {
            score = FALLBACK_WEIGHT;
        }
        score
    }
}
