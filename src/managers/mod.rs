// Tidymarks state managers
// Managers own persistent state: the bookmark store, its lifecycle handle and the host mirror loop.

pub mod bookmark_store;
pub mod mirror;
pub mod store_handle;
