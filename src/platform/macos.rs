// Tidymarks platform probes for macOS
// Config: ~/Library/Application Support/Tidymarks
// Data:   ~/Library/Application Support/Tidymarks

use std::env;
use std::path::PathBuf;

fn home_dir() -> PathBuf {
    PathBuf::from(env::var("HOME").unwrap_or_else(|_| String::from("/tmp")))
}

/// `~/Library/Application Support/Tidymarks`
pub fn get_config_dir() -> PathBuf {
    home_dir()
        .join("Library")
        .join("Application Support")
        .join("Tidymarks")
}

/// Same as the config directory on macOS.
pub fn get_data_dir() -> PathBuf {
    get_config_dir()
}

/// No cheap probe without extra bindings; callers fall back to a fixed budget.
pub fn available_memory_bytes() -> Option<u64> {
    None
}
