//! Relevance scoring and highlight extraction for search candidates.

use crate::types::node::BookmarkRecord;
use crate::types::search::{CrawlMetadata, CrawlStatus, Highlight, MatchField};

/// Per-field weights, added once per query term that hits the field.
pub mod weights {
    pub const TITLE_PREFIX: f64 = 10.0;
    pub const TITLE_SUBSTRING: f64 = 5.0;
    pub const URL_SUBSTRING: f64 = 3.0;
    pub const DOMAIN_SUBSTRING: f64 = 2.0;
    pub const KEYWORD: f64 = 1.5;
    pub const TAG: f64 = 1.0;
    pub const META_TITLE: f64 = 1.0;
    pub const META_DESCRIPTION: f64 = 0.5;
    pub const META_KEYWORDS: f64 = 0.75;
}

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Decay applied to metadata weights: 1.0 under 90 days, 0.8 under 180, 0.6
/// beyond, halved again when the crawl failed.
pub fn freshness(meta: &CrawlMetadata, now_ms: i64) -> f64 {
    let age_days = (now_ms - meta.crawled_at).max(0) / DAY_MS;
    let base = if age_days < 90 {
        1.0
    } else if age_days < 180 {
        0.8
    } else {
        0.6
    };
    match meta.status {
        CrawlStatus::Failed => base * 0.5,
        CrawlStatus::Success => base,
    }
}

/// Score, matched fields and highlight spans of one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scored {
    pub score: f64,
    pub matched_fields: Vec<MatchField>,
    pub highlights: Vec<Highlight>,
}

impl Scored {
    fn hit(&mut self, field: MatchField, weight: f64) {
        self.score += weight;
        if !self.matched_fields.contains(&field) {
            self.matched_fields.push(field);
        }
    }

    fn highlight(&mut self, field: MatchField, value: &str, term: &str) {
        if let Some((start, end)) = find_case_insensitive(value, term) {
            self.highlights.push(Highlight {
                field,
                start,
                end,
                text: value[start..end].to_string(),
            });
        }
    }
}

/// Scores `record` against lowercase `terms`. Metadata is optional.
pub fn score_record(
    record: &BookmarkRecord,
    terms: &[String],
    metadata: Option<&CrawlMetadata>,
    now_ms: i64,
) -> Scored {
    let mut scored = Scored::default();
    let fresh = metadata.map(|m| freshness(m, now_ms)).unwrap_or(0.0);

    for term in terms {
        if record.title_lower.starts_with(term.as_str()) {
            scored.hit(MatchField::Title, weights::TITLE_PREFIX);
            scored.highlight(MatchField::Title, &record.title, term);
        } else if record.title_lower.contains(term.as_str()) {
            scored.hit(MatchField::Title, weights::TITLE_SUBSTRING);
            scored.highlight(MatchField::Title, &record.title, term);
        }

        if let (Some(url), Some(url_lower)) = (&record.url, &record.url_lower) {
            if url_lower.contains(term.as_str()) {
                scored.hit(MatchField::Url, weights::URL_SUBSTRING);
                scored.highlight(MatchField::Url, url, term);
            }
        }

        if let Some(domain) = &record.domain {
            if domain.contains(term.as_str()) {
                scored.hit(MatchField::Domain, weights::DOMAIN_SUBSTRING);
                scored.highlight(MatchField::Domain, domain, term);
            }
        }

        if record.keywords.iter().any(|k| k.starts_with(term.as_str())) {
            scored.hit(MatchField::Keywords, weights::KEYWORD);
        }

        if record.tags.iter().any(|t| t.starts_with(term.as_str())) {
            scored.hit(MatchField::Tags, weights::TAG);
        }

        if let Some(meta) = metadata {
            if let Some(title) = &meta.title {
                if title.to_lowercase().contains(term.as_str()) {
                    scored.hit(MatchField::MetaTitle, weights::META_TITLE * fresh);
                    scored.highlight(MatchField::MetaTitle, title, term);
                }
            }
            if let Some(description) = &meta.description {
                if description.to_lowercase().contains(term.as_str()) {
                    scored.hit(MatchField::MetaDescription, weights::META_DESCRIPTION * fresh);
                    scored.highlight(MatchField::MetaDescription, description, term);
                }
            }
            if meta
                .keywords
                .iter()
                .any(|k| k.to_lowercase().contains(term.as_str()))
            {
                scored.hit(MatchField::MetaKeywords, weights::META_KEYWORDS * fresh);
            }
        }
    }
    scored
}

/// Finds `needle` (already lowercase) in `haystack` ignoring case.
///
/// Returns byte offsets into `haystack` itself, which may differ from offsets
/// into its lowercase form when lowercasing changes a character's length.
/// Final sigma is folded to `σ` on both sides, since whole-string lowercasing
/// picks `ς` by context while per-character lowercasing cannot.
pub fn find_case_insensitive(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    if needle.is_empty() {
        return None;
    }
    let needle: String = needle.chars().map(fold_sigma).collect();
    for (start, _) in haystack.char_indices() {
        let mut lowered = String::new();
        for (offset, c) in haystack[start..].char_indices() {
            lowered.extend(c.to_lowercase().map(fold_sigma));
            if lowered.len() >= needle.len() {
                if lowered == needle {
                    return Some((start, start + offset + c.len_utf8()));
                }
                break;
            }
            if !needle.starts_with(lowered.as_str()) {
                break;
            }
        }
    }
    None
}

fn fold_sigma(c: char) -> char {
    if c == 'ς' {
        'σ'
    } else {
        c
    }
}
