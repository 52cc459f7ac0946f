//! Startup security gates.
//!
//! Checked once before a service boots: a dashboard without a real secret
//! and a world-writable store file are both refusals, not warnings.

use std::path::Path;

use scout_types::ConfigError;

/// Environment variable holding the dashboard auth secret.
pub const DASHBOARD_SECRET_VAR: &str = "SCOUT_DASHBOARD_SECRET";

const MIN_SECRET_LEN: usize = 32;

/// When the dashboard is enabled its secret must be present and at least
/// 32 characters.
pub fn check_dashboard_secret(
    dashboard_enabled: bool,
    secret: Option<&str>,
) -> Result<(), ConfigError> {
    if !dashboard_enabled {
        return Ok(());
    }
    match secret {
        Some(s) if s.chars().count() >= MIN_SECRET_LEN => Ok(()),
        _ => Err(ConfigError::DashboardSecretTooShort {
            min_len: MIN_SECRET_LEN,
        }),
    }
}

/// Read the dashboard gate from the environment.
pub fn check_dashboard_env(dashboard_enabled: bool) -> Result<(), ConfigError> {
    let secret = std::env::var(DASHBOARD_SECRET_VAR).ok();
    check_dashboard_secret(dashboard_enabled, secret.as_deref())
}

/// Refuse to boot on a world-writable store file.
#[cfg(unix)]
pub fn check_store_file(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        // A store file that does not exist yet will be created with the
        // process umask; nothing to check.
        return Ok(());
    };
    if metadata.permissions().mode() & 0o002 != 0 {
        return Err(ConfigError::WorldWritableStore {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_store_file(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
