// Tidymarks platform probes for Linux
// Config: $XDG_CONFIG_HOME/tidymarks or ~/.config/tidymarks
// Data:   $XDG_DATA_HOME/tidymarks or ~/.local/share/tidymarks
// Memory: MemAvailable from /proc/meminfo

use std::env;
use std::fs;
use std::path::PathBuf;

fn home_dir() -> PathBuf {
    PathBuf::from(env::var("HOME").unwrap_or_else(|_| String::from("/tmp")))
}

/// Returns the configuration directory on Linux.
pub fn get_config_dir() -> PathBuf {
    match env::var("XDG_CONFIG_HOME") {
        Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg).join("tidymarks"),
        _ => home_dir().join(".config").join("tidymarks"),
    }
}

/// Returns the data directory on Linux.
pub fn get_data_dir() -> PathBuf {
    match env::var("XDG_DATA_HOME") {
        Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg).join("tidymarks"),
        _ => home_dir().join(".local").join("share").join("tidymarks"),
    }
}

/// Reads `MemAvailable` from `/proc/meminfo`.
pub fn available_memory_bytes() -> Option<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&meminfo)
}

fn parse_mem_available(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}
