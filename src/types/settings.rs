use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine settings container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EngineSettings {
    pub storage: StorageSettings,
    pub search: SearchSettings,
    pub reconcile: ReconcileSettings,
}

/// Persistent store tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    /// Fixed batch size; `None` picks one from record count and available memory.
    pub batch_size: Option<usize>,
    /// Attempts per batch after the first failure.
    pub write_retries: u32,
    pub retry_backoff_ms: u64,
    pub init_timeout_ms: u64,
    pub busy_timeout_ms: u64,
    /// Overrides the platform memory probe when sizing batches.
    pub memory_budget_bytes: Option<u64>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            batch_size: None,
            write_retries: 3,
            retry_backoff_ms: 50,
            init_timeout_ms: 10_000,
            busy_timeout_ms: 2_000,
            memory_budget_bytes: None,
        }
    }
}

impl StorageSettings {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Lock wait used while opening. Kept under half the init timeout so a
    /// locked file reports `MigrationBlocked` before the open is treated as hung.
    pub fn open_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms.min(self.init_timeout_ms / 2))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Search engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    pub cache_capacity: usize,
    pub default_limit: usize,
    /// Lower bound of the candidate cap (`max(floor, limit * 3)`).
    pub candidate_floor: usize,
    pub metadata_scoring: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            cache_capacity: 64,
            default_limit: 50,
            candidate_floor: 200,
            metadata_scoring: true,
        }
    }
}

/// Reconciliation executor tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileSettings {
    pub batch_size: usize,
    /// Wait after the last batch so host notifications can land before the reload.
    pub settle_delay_ms: u64,
    /// Extra time the self-change flag stays raised after completion.
    pub self_change_clear_ms: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            settle_delay_ms: 300,
            self_change_clear_ms: 1_000,
        }
    }
}

impl ReconcileSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn self_change_clear(&self) -> Duration {
        Duration::from_millis(self.self_change_clear_ms)
    }

    /// Settings for tests: no waiting anywhere.
    pub fn immediate() -> Self {
        Self {
            batch_size: 50,
            settle_delay_ms: 0,
            self_change_clear_ms: 0,
        }
    }
}
