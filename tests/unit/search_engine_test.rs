//! Unit tests for the SearchEngine: candidate retrieval, ranking, the scan
//! fallback, caching and metadata scoring.

use std::sync::Arc;

use rstest::rstest;
use tidymarks::managers::store_handle::StoreHandle;
use tidymarks::services::search_engine::{SearchEngine, SearchEngineTrait};
use tidymarks::types::errors::SearchError;
use tidymarks::types::node::Node;
use tidymarks::types::search::{CrawlMetadata, CrawlStatus, MatchField, SearchOptions, SortBy};
use tidymarks::types::settings::{SearchSettings, StorageSettings};

fn node(id: &str, parent: Option<&str>, index: u32, title: &str, url: Option<&str>) -> Node {
    Node {
        id: id.into(),
        parent_id: parent.map(Into::into),
        index,
        title: title.into(),
        url: url.map(Into::into),
        date_added: 1_700_000_000_000 + index as i64,
        date_modified: None,
    }
}

fn library() -> Vec<Node> {
    vec![
        node("0", None, 0, "", None),
        node("1", Some("0"), 0, "Bookmarks Bar", None),
        node("10", Some("1"), 0, "React Router", Some("https://reactrouter.com/en/main")),
        node("11", Some("1"), 1, "React Native", Some("https://reactnative.dev/")),
        node("12", Some("1"), 2, "Preact", Some("https://preactjs.com/")),
        node("13", Some("1"), 3, "Reactive folder", None),
        node("14", Some("1"), 4, "Docs alpha", Some("https://a.example/x")),
        node("15", Some("1"), 5, "Docs beta", Some("https://b.example/y")),
    ]
}

async fn setup() -> (Arc<StoreHandle>, SearchEngine) {
    let handle = Arc::new(StoreHandle::in_memory(StorageSettings::default()));
    let store = handle.initialize().await.unwrap();
    store.replace_all(&library()).unwrap();
    let engine = SearchEngine::new(handle.clone(), SearchSettings::default());
    (handle, engine)
}

fn titles(results: &[tidymarks::types::search::SearchResult]) -> Vec<&str> {
    results.iter().map(|r| r.record.title.as_str()).collect()
}

#[tokio::test]
async fn test_prefix_titles_rank_above_substring() {
    let (_handle, engine) = setup().await;
    let results = engine.search("react", &SearchOptions::default()).unwrap();

    let found = titles(&results);
    assert!(found.len() >= 2);
    assert!(found[..2].contains(&"React Router"));
    assert!(found[..2].contains(&"React Native"));
    if let Some(pos) = found.iter().position(|t| *t == "Preact") {
        assert!(pos >= 2);
    }
}

#[tokio::test]
async fn test_all_terms_outrank_one() {
    let (_handle, engine) = setup().await;
    let results = engine.search("react router", &SearchOptions::default()).unwrap();
    assert_eq!(results[0].record.title, "React Router");
    assert!(results[0].score > results[1].score);
}

#[tokio::test]
async fn test_highlights_point_into_original_title() {
    let (_handle, engine) = setup().await;
    let results = engine.search("ROUTER", &SearchOptions::default()).unwrap();
    let hit = &results[0];
    assert!(hit.matched_fields.contains(&MatchField::Title));
    let title_span = hit
        .highlights
        .iter()
        .find(|h| h.field == MatchField::Title)
        .unwrap();
    assert_eq!((title_span.start, title_span.end), (6, 12));
    assert_eq!(title_span.text, "Router");
}

#[tokio::test]
async fn test_scan_fallback_finds_substrings() {
    let (_handle, engine) = setup().await;
    let results = engine.search("act", &SearchOptions::default()).unwrap();
    assert_eq!(results.len(), 3);

    let limited = engine
        .search(
            "act",
            &SearchOptions {
                limit: 2,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_folders_only_on_request() {
    let (_handle, engine) = setup().await;
    let without = engine.search("reactive", &SearchOptions::default()).unwrap();
    assert!(without.is_empty());

    let with = engine
        .search(
            "reactive",
            &SearchOptions {
                include_folders: true,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert_eq!(titles(&with), vec!["Reactive folder"]);
}

#[tokio::test]
async fn test_metadata_breaks_ties() {
    let (handle, engine) = setup().await;
    let plain = engine.search("docs", &SearchOptions::default()).unwrap();
    assert_eq!(titles(&plain), vec!["Docs alpha", "Docs beta"]);

    handle
        .current()
        .unwrap()
        .put_crawl_metadata(&CrawlMetadata {
            bookmark_id: "15".into(),
            title: None,
            description: Some("Reference docs".into()),
            keywords: vec![],
            status: CrawlStatus::Success,
            crawled_at: chrono::Utc::now().timestamp_millis(),
        })
        .unwrap();

    let boosted = engine.search("docs", &SearchOptions::default()).unwrap();
    assert_eq!(titles(&boosted), vec!["Docs beta", "Docs alpha"]);
    assert!(boosted[0].matched_fields.contains(&MatchField::MetaDescription));

    let ignored = engine
        .search(
            "docs",
            &SearchOptions {
                use_metadata: false,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert_eq!(titles(&ignored), vec!["Docs alpha", "Docs beta"]);
}

#[tokio::test]
async fn test_sort_by_title_and_min_score() {
    let (_handle, engine) = setup().await;
    let by_title = engine
        .search(
            "react",
            &SearchOptions {
                sort_by: SortBy::Title,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    let found = titles(&by_title);
    let mut sorted = found.clone();
    sorted.sort_by_key(|t| t.to_lowercase());
    assert_eq!(found, sorted);

    let strict = engine
        .search(
            "react",
            &SearchOptions {
                min_score: 10.0,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert!(strict.iter().all(|r| r.score >= 10.0));
    assert!(strict.iter().all(|r| r.record.title.starts_with("React")));
}

#[tokio::test]
async fn test_cache_hits_and_invalidation() {
    let (handle, engine) = setup().await;
    let first = engine.search("react", &SearchOptions::default()).unwrap();
    assert_eq!(engine.cache_len(), 1);
    let second = engine.search("  React  ", &SearchOptions::default()).unwrap();
    assert_eq!(first, second);
    assert_eq!(engine.cache_len(), 1);

    handle.current().unwrap().delete("10").unwrap();
    let after = engine.search("react", &SearchOptions::default()).unwrap();
    assert!(!titles(&after).contains(&"React Router"));

    engine.clear_cache();
    assert_eq!(engine.cache_len(), 0);
}

#[rstest]
#[case("", 10)]
#[case("   \t ", 10)]
#[case("react", 0)]
#[tokio::test]
async fn test_invalid_queries(#[case] query: &str, #[case] limit: usize) {
    let (_handle, engine) = setup().await;
    let result = engine.search(
        query,
        &SearchOptions {
            limit,
            ..SearchOptions::default()
        },
    );
    assert!(matches!(result, Err(SearchError::InvalidQuery(_))));
}

#[tokio::test]
async fn test_uninitialized_store_is_reported() {
    let handle = Arc::new(StoreHandle::in_memory(StorageSettings::default()));
    let engine = SearchEngine::new(handle, SearchSettings::default());
    assert!(matches!(
        engine.search("react", &SearchOptions::default()),
        Err(SearchError::Uninitialized)
    ));
}
