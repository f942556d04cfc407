//! Environment Configuration Loader
//!
//! Container runtimes start CNI plugins with a scrubbed environment, so the
//! path overrides headcni honours (`HEADCNI_SUBNET_FILE`, `HEADCNI_DATA_DIR`,
//! `HEADCNI_LOG`) can also be provided through an environment file.
//!
//! Call `load_environment()` early in main() before resolving any paths:
//!
//! ```rust,no_run
//! use headcni_core::config::load_environment;
//!
//! load_environment();
//! ```

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Overrides the subnet environment file path
pub const SUBNET_FILE_ENV: &str = "HEADCNI_SUBNET_FILE";

/// Overrides the state data directory
pub const DATA_DIR_ENV: &str = "HEADCNI_DATA_DIR";

/// Overrides the location of the environment file itself
pub const ENV_FILE_ENV: &str = "HEADCNI_ENV_FILE";

/// Default path for the environment file
pub const DEFAULT_ENV_FILE: &str = "/etc/headcni/environment";

/// Load environment variables from the headcni environment file.
///
/// `HEADCNI_ENV_FILE` is checked first, then `/etc/headcni/environment`.
/// Variables that are already set are never overridden.
///
/// Returns the path that was loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Some(custom_path) = get_config_opt(ENV_FILE_ENV) {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    if let Some(path) = try_load_env_file(DEFAULT_ENV_FILE) {
        return Some(path);
    }

    debug!("No environment file found, using existing environment");
    None
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);

    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for (key, value) in content.lines().filter_map(parse_env_line) {
                if std::env::var_os(&key).is_none() {
                    std::env::set_var(&key, &value);
                    loaded_count += 1;
                } else {
                    skipped_count += 1;
                    debug!("Skipped (already set): {}", key);
                }
            }

            debug!(
                "Loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );

            Some(path.to_string())
        }
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            None
        }
    }
}

/// Parse a single `KEY=VALUE` line, skipping comments and blanks.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Get an optional configuration value; empty values count as unset.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
