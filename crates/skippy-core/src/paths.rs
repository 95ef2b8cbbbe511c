//! Per-user data layout under `~/.Skippy/`.

use std::path::PathBuf;

/// Root data directory: `$HOME/.Skippy`.
pub fn data_root() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".Skippy")
}

pub fn config_file() -> PathBuf {
    data_root().join("Skippy.json")
}

pub fn log_file() -> PathBuf {
    data_root().join("Skippy.log")
}

pub fn socket_file() -> PathBuf {
    data_root().join("skippy.sock")
}

/// Persistent context items (files/images attached to every prompt).
pub fn context_file() -> PathBuf {
    data_root().join("context.json")
}

pub fn memory_db() -> PathBuf {
    data_root().join("memory").join("memory.db")
}

pub fn cron_db() -> PathBuf {
    data_root().join("memory").join("cron.db")
}

/// Create the `memory/` subdirectory if absent. The root itself is a startup
/// precondition and is never created implicitly.
pub fn ensure_memory_dir() -> std::io::Result<()> {
    std::fs::create_dir_all(data_root().join("memory"))
}
