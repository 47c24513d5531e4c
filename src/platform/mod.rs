// Tidymarks platform abstraction
// Provides platform-specific paths and a memory probe used to size write batches.
//
// Uses `cfg(target_os)` for conditional compilation to select the correct
// platform-specific implementation at compile time.

use std::path::PathBuf;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux as imp;

#[cfg(target_os = "macos")]
use macos as imp;

#[cfg(target_os = "windows")]
use windows as imp;

/// Returns the platform-specific configuration directory.
///
/// - **Linux**: `~/.config/tidymarks` (or `$XDG_CONFIG_HOME/tidymarks`)
/// - **macOS**: `~/Library/Application Support/Tidymarks`
/// - **Windows**: `%APPDATA%/Tidymarks`
pub fn get_config_dir() -> PathBuf {
    imp::get_config_dir()
}

/// Returns the platform-specific data directory (where the database lives).
pub fn get_data_dir() -> PathBuf {
    imp::get_data_dir()
}

/// Default location of the bookmark database file.
pub fn default_database_path() -> PathBuf {
    get_data_dir().join("bookmarks.db")
}

/// Best-effort estimate of currently available physical memory.
pub fn available_memory_bytes() -> Option<u64> {
    imp::available_memory_bytes()
}
