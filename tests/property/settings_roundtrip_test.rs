//! Property-based tests for EngineSettings serialization round-trip.
//!
//! Any valid settings value survives JSON serialization, and a settings file
//! written by one SettingsEngine loads back unchanged in another.

use proptest::prelude::*;
use tidymarks::services::settings_engine::{validate, SettingsEngine, SettingsEngineTrait};
use tidymarks::types::settings::{EngineSettings, ReconcileSettings, SearchSettings, StorageSettings};

fn arb_storage_settings() -> impl Strategy<Value = StorageSettings> {
    (
        proptest::option::of(1usize..=5_000),
        0u32..=10,
        0u64..=5_000,
        1u64..=120_000,
        0u64..=60_000,
        proptest::option::of(1u64..=(8u64 << 30)),
    )
        .prop_map(
            |(batch_size, write_retries, retry_backoff_ms, init_timeout_ms, busy_timeout_ms, memory_budget_bytes)| {
                StorageSettings {
                    batch_size,
                    write_retries,
                    retry_backoff_ms,
                    init_timeout_ms,
                    busy_timeout_ms,
                    memory_budget_bytes,
                }
            },
        )
}

fn arb_search_settings() -> impl Strategy<Value = SearchSettings> {
    (0usize..=1_024, 1usize..=500, 0usize..=2_000, any::<bool>()).prop_map(
        |(cache_capacity, default_limit, candidate_floor, metadata_scoring)| SearchSettings {
            cache_capacity,
            default_limit,
            candidate_floor,
            metadata_scoring,
        },
    )
}

fn arb_reconcile_settings() -> impl Strategy<Value = ReconcileSettings> {
    (1usize..=500, 0u64..=5_000, 0u64..=10_000).prop_map(
        |(batch_size, settle_delay_ms, self_change_clear_ms)| ReconcileSettings {
            batch_size,
            settle_delay_ms,
            self_change_clear_ms,
        },
    )
}

fn arb_engine_settings() -> impl Strategy<Value = EngineSettings> {
    (arb_storage_settings(), arb_search_settings(), arb_reconcile_settings()).prop_map(
        |(storage, search, reconcile)| EngineSettings {
            storage,
            search,
            reconcile,
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn settings_serialization_roundtrip(settings in arb_engine_settings()) {
        prop_assert!(validate(&settings).is_ok());

        let json = serde_json::to_string(&settings)
            .expect("Serialization to JSON should succeed for any valid EngineSettings");
        let deserialized: EngineSettings = serde_json::from_str(&json)
            .expect("Deserialization from JSON should succeed for valid JSON");

        prop_assert_eq!(deserialized, settings, "Deserialized EngineSettings must equal the original");
    }

    #[test]
    fn settings_file_roundtrip(settings in arb_engine_settings()) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json").to_string_lossy().to_string();

        SettingsEngine::with_settings(path.clone(), settings.clone())
            .save()
            .expect("save should succeed in a fresh directory");

        let mut reopened = SettingsEngine::new(Some(path));
        let loaded = reopened.load().expect("load should accept a file written by save");
        prop_assert_eq!(&loaded, &settings);
        prop_assert_eq!(reopened.get_settings(), &settings);
    }
}
