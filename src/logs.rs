//! Logging setup and redirect target upkeep
//!
//! Log records go to stderr, which after detachment is the configured
//! stderr target. The redirect targets are only ever appended to, so they
//! are rotated before each start.

use crate::constants::MAX_LOG_SIZE;
use crate::error::Result;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Default filter directive for the given verbosity
pub fn default_directive(debug_mode: bool) -> &'static str {
    if debug_mode {
        "icdaemon=debug"
    } else {
        "icdaemon=warn"
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `debug_mode`.
pub fn init_logging(debug_mode: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_mode)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

/// Rotate a redirect target to `<name>.old` if it exceeds `MAX_LOG_SIZE`
pub fn rotate_log_if_needed(log_path: &Path) -> Result<bool> {
    rotate_if_larger(log_path, MAX_LOG_SIZE)
}

fn rotate_if_larger(log_path: &Path, max_size: u64) -> Result<bool> {
    let metadata = match fs::metadata(log_path) {
        Ok(metadata) => metadata,
        Err(_) => return Ok(false),
    };
    // devices such as /dev/null are never rotated
    if !metadata.is_file() || metadata.len() <= max_size {
        return Ok(false);
    }

    let mut backup_name = log_path.as_os_str().to_os_string();
    backup_name.push(".old");
    let backup_path = Path::new(&backup_name);

    if backup_path.exists() {
        fs::remove_file(backup_path)?;
    }
    fs::rename(log_path, backup_path)?;

    tracing::info!(from = %log_path.display(), to = %backup_path.display(), "rotated log file");
    Ok(true)
}
