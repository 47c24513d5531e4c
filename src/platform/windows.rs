// Tidymarks platform probes for Windows
// Config: %APPDATA%/Tidymarks
// Data:   %APPDATA%/Tidymarks

use std::env;
use std::path::PathBuf;

/// `%APPDATA%/Tidymarks`
pub fn get_config_dir() -> PathBuf {
    let appdata =
        env::var("APPDATA").unwrap_or_else(|_| String::from("C:\\Users\\Default\\AppData\\Roaming"));
    PathBuf::from(appdata).join("Tidymarks")
}

/// Same as the config directory on Windows.
pub fn get_data_dir() -> PathBuf {
    get_config_dir()
}

/// No cheap probe without extra bindings; callers fall back to a fixed budget.
pub fn available_memory_bytes() -> Option<u64> {
    None
}
