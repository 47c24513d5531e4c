//! Search Engine for Tidymarks.
//!
//! Multi-term queries are answered from the store's prefix indexes: each term
//! pulls a bounded candidate set from the title, domain, URL and keyword
//! indexes, the union is scored, filtered and sorted. The engine only reads.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::query_cache::{cache_key, QueryCache};
use super::scoring;
use crate::managers::bookmark_store::{BookmarkStore, IndexField};
use crate::managers::store_handle::StoreHandle;
use crate::types::errors::SearchError;
use crate::types::node::BookmarkRecord;
use crate::types::search::{SearchOptions, SearchResult, SortBy};
use crate::types::settings::SearchSettings;

/// Trait defining the search interface used by the RPC layer.
pub trait SearchEngineTrait {
    fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>, SearchError>;
    fn cache_len(&self) -> usize;
    fn clear_cache(&self);
}

/// Splits a query into lowercase whitespace-delimited terms.
pub fn tokenize(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

pub struct SearchEngine {
    store: Arc<StoreHandle>,
    settings: SearchSettings,
    cache: Mutex<QueryCache<Vec<SearchResult>>>,
}

impl SearchEngine {
    pub fn new(store: Arc<StoreHandle>, settings: SearchSettings) -> Self {
        let cache = Mutex::new(QueryCache::new(settings.cache_capacity));
        Self {
            store,
            settings,
            cache,
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    fn candidate_cap(&self, limit: usize) -> usize {
        self.settings.candidate_floor.max(limit.saturating_mul(3))
    }

    /// Union of index hits across terms and fields, capped at `cap`.
    fn collect_candidates(
        &self,
        store: &BookmarkStore,
        terms: &[String],
        cap: usize,
    ) -> Result<Vec<BookmarkRecord>, SearchError> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut add = |records: Vec<BookmarkRecord>, candidates: &mut Vec<BookmarkRecord>| {
            for record in records {
                if candidates.len() >= cap {
                    return;
                }
                if seen.insert(record.id.clone()) {
                    candidates.push(record);
                }
            }
        };

        'terms: for term in terms {
            for field in [IndexField::Title, IndexField::Domain, IndexField::Url] {
                if candidates.len() >= cap {
                    break 'terms;
                }
                add(store.prefix_lookup(field, term, cap)?, &mut candidates);
            }
            if candidates.len() >= cap {
                break;
            }
            add(store.keyword_lookup(term, cap)?, &mut candidates);
        }
        Ok(candidates)
    }

    fn score_all(
        &self,
        store: &BookmarkStore,
        candidates: Vec<BookmarkRecord>,
        terms: &[String],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let metadata = if options.use_metadata && self.settings.metadata_scoring {
            let ids: Vec<String> = candidates.iter().map(|r| r.id.clone()).collect();
            store.crawl_metadata_for(&ids)?
        } else {
            Default::default()
        };
        let now = chrono::Utc::now().timestamp_millis();

        Ok(candidates
            .into_iter()
            .filter(|record| options.include_folders || record.is_bookmark())
            .filter_map(|record| {
                let scored = scoring::score_record(&record, terms, metadata.get(&record.id), now);
                if scored.score > 0.0 && scored.score >= options.min_score {
                    Some(SearchResult {
                        record,
                        score: scored.score,
                        matched_fields: scored.matched_fields,
                        highlights: scored.highlights,
                    })
                } else {
                    None
                }
            })
            .collect())
    }

    /// Full scan used when no index produced a candidate; stops after `limit` hits.
    ///
    /// The scan holds the store's connection, so matches are collected first
    /// and scored with metadata afterwards.
    fn scan_fallback(
        &self,
        store: &BookmarkStore,
        terms: &[String],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let mut matched = Vec::new();
        store.scan(|record| {
            if (options.include_folders || record.is_bookmark())
                && scoring::score_record(&record, terms, None, 0).score > 0.0
            {
                matched.push(record);
            }
            matched.len() < options.limit
        })?;
        self.score_all(store, matched, terms, options)
    }
}

fn sort_results(results: &mut [SearchResult], sort_by: SortBy) {
    match sort_by {
        SortBy::Relevance => results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.record.title_lower.cmp(&b.record.title_lower))
                .then_with(|| a.record.id.cmp(&b.record.id))
        }),
        SortBy::Title => results.sort_by(|a, b| {
            a.record
                .title_lower
                .cmp(&b.record.title_lower)
                .then_with(|| a.record.id.cmp(&b.record.id))
        }),
        SortBy::DateAdded => results.sort_by(|a, b| {
            b.record
                .date_added
                .cmp(&a.record.date_added)
                .then_with(|| a.record.id.cmp(&b.record.id))
        }),
        SortBy::Url => results.sort_by(|a, b| {
            let key = |r: &SearchResult| r.record.url_lower.clone().unwrap_or_default();
            key(a).cmp(&key(b)).then_with(|| a.record.id.cmp(&b.record.id))
        }),
    }
}

impl SearchEngineTrait for SearchEngine {
    /// Runs a ranked search.
    ///
    /// # Errors
    /// `SearchError::InvalidQuery` for an empty query or a zero limit,
    /// `SearchError::Uninitialized` when no store is open.
    fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>, SearchError> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Err(SearchError::InvalidQuery("query is empty".to_string()));
        }
        if options.limit == 0 {
            return Err(SearchError::InvalidQuery("limit must be at least 1".to_string()));
        }
        if options.min_score.is_nan() {
            return Err(SearchError::InvalidQuery("min_score is not a number".to_string()));
        }

        let store = self.store.current()?;
        let generation = store.generation();
        let key = cache_key(&terms.join(" "), options);
        if let Some(key) = &key {
            if let Ok(mut cache) = self.cache.lock() {
                if let Some(hit) = cache.get(key, generation) {
                    debug!(query, "search cache hit");
                    return Ok(hit);
                }
            }
        }

        let cap = self.candidate_cap(options.limit);
        let candidates = self.collect_candidates(&store, &terms, cap)?;
        let mut results = if candidates.is_empty() {
            debug!(query, "no index candidates, scanning");
            self.scan_fallback(&store, &terms, options)?
        } else {
            debug!(query, candidates = candidates.len(), "scoring candidates");
            self.score_all(&store, candidates, &terms, options)?
        };

        sort_results(&mut results, options.sort_by);
        results.truncate(options.limit);

        if let Some(key) = key {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(key, generation, results.clone());
            }
        }
        Ok(results)
    }

    fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}
