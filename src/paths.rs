//! Centralized path resolution for strata
//!
//! # Environment Variables
//!
//! - `STRATA_STATE_DIR` - Override the state directory
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `--state-dir` on the command line
//! 2. `STRATA_STATE_DIR` environment variable
//! 3. `XDG_STATE_HOME/strata` (if set)
//! 4. Platform default:
//!    - Windows: `%LOCALAPPDATA%\strata`
//!    - macOS/Linux: `~/.local/state/strata`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "STRATA_STATE_DIR";

/// Get the strata state directory path
pub fn state_dir(cli_override: Option<&Path>) -> Result<PathBuf> {
    // 1. Command line
    if let Some(dir) = cli_override {
        let path = expand(&dir.to_string_lossy());
        log::debug!("Using state dir from --state-dir: {}", path.display());
        return Ok(path);
    }

    // 2. Environment variable override
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    // 3. XDG_STATE_HOME
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("strata");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    // 4. Platform default
    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("strata");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("strata");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Expand `~` and environment variables in a path string.
///
/// Unknown variables are left as written.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, PoisonError};

    /// Serializes tests that touch process environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Run `f` with `key` set, restoring the previous value afterwards
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: callers hold ENV_LOCK
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: callers hold ENV_LOCK
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    /// Run `f` with `key` unset, restoring the previous value afterwards
    fn without_env_var<F, R>(key: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: callers hold ENV_LOCK
        unsafe { env::remove_var(key) };
        let result = f();
        if let Some(v) = original {
            // SAFETY: callers hold ENV_LOCK
            unsafe { env::set_var(key, v) };
        }
        result
    }

    #[test]
    fn test_cli_override_wins() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        with_env_var(ENV_STATE_DIR, "/from/env", || {
            let result = state_dir(Some(Path::new("/from/cli"))).unwrap();
            assert_eq!(result, PathBuf::from("/from/cli"));
        });
    }

    #[test]
    fn test_state_dir_env_override() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        with_env_var(ENV_STATE_DIR, "/custom/state/path", || {
            let result = state_dir(None).unwrap();
            assert_eq!(result, PathBuf::from("/custom/state/path"));
        });
    }

    #[test]
    fn test_xdg_state_home() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        without_env_var(ENV_STATE_DIR, || {
            with_env_var("XDG_STATE_HOME", "/tmp/xdg-state-test", || {
                let result = state_dir(None).unwrap();
                assert_eq!(result, PathBuf::from("/tmp/xdg-state-test/strata"));
            });
        });
    }

    #[cfg(unix)]
    #[test]
    fn test_default_state_dir_unix() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        without_env_var(ENV_STATE_DIR, || {
            without_env_var("XDG_STATE_HOME", || {
                let result = state_dir(None).unwrap();
                let home = dirs::home_dir().unwrap();
                assert_eq!(result, home.join(".local").join("state").join("strata"));
            });
        });
    }

    #[test]
    fn test_expand_with_tilde() {
        let result = expand("~/state");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("state"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_STRATA_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_STRATA_VAR_12345/file"));
    }
}
