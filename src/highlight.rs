use std::collections::HashSet;

use regex::{Regex, RegexBuilder};

use crate::search::ParsedQuery;

/// Case-insensitive matcher for the inclusion tokens of a query.
pub fn query_highlighter(query: &ParsedQuery) -> Option<Regex> {
    let mut tokens: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for token in &query.include {
        if !token.is_empty() && seen.insert(token.as_str()) {
            tokens.push(token);
        }
    }
    if tokens.is_empty() {
        return None;
    }
    tokens.sort_by(|a, b| b.len().cmp(&a.len()));
    let pattern = tokens
        .into_iter()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

/// Splits `text` into `(segment, matched)` runs.
pub fn segments<'a>(text: &'a str, highlighter: Option<&Regex>) -> Vec<(&'a str, bool)> {
    let Some(regex) = highlighter else {
        return vec![(text, false)];
    };
    let mut out = Vec::new();
    let mut cursor = 0;
    for found in regex.find_iter(text) {
        if found.start() > cursor {
            out.push((&text[cursor..found.start()], false));
        }
        if found.end() > found.start() {
            out.push((found.as_str(), true));
        }
        cursor = found.end();
    }
    if cursor < text.len() {
        out.push((&text[cursor..], false));
    }
    if out.is_empty() {
        out.push((text, false));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::parse_query;

    #[test]
    fn longer_tokens_win() {
        let regex = query_highlighter(&parse_query("data database")).expect("regex");
        let hits: Vec<_> = regex.find_iter("Database admin").map(|m| m.as_str()).collect();
        assert_eq!(hits, vec!["Database"]);
    }

    #[test]
    fn exclusions_are_not_highlighted() {
        assert!(query_highlighter(&parse_query("-intern")).is_none());
    }

    #[test]
    fn segments_cover_the_whole_text() {
        let regex = query_highlighter(&parse_query("seoul")).expect("regex");
        let parts = segments("Seoul city, SEOUL office", Some(&regex));
        assert_eq!(
            parts,
            vec![
                ("Seoul", true),
                (" city, ", false),
                ("SEOUL", true),
                (" office", false)
            ]
        );
        assert_eq!(segments("plain", None), vec![("plain", false)]);
    }
}
