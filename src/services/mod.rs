// Tidymarks services
// Services hold the engine logic: search, tree editing, diffing, reconciliation and settings.

pub mod memory_host;
pub mod proposal_tree;
pub mod query_cache;
pub mod reconciler;
pub mod scoring;
pub mod search_engine;
pub mod settings_engine;
pub mod tree_diff;
pub mod tree_host;
