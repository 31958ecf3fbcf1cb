//! Configuration loading and persistence.
//!
//! `clipssh` has no long-lived account state of its own — each run is
//! parameterized almost entirely by CLI flags (spec §6) — but a small
//! set of defaults (preferred clipboard backend, last-used transport)
//! are persisted the same way the rest of the ambient stack expects:
//! JSON under the platform config dir, 0600 permissions, env-var
//! overrides layered on top of the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{fs, path::PathBuf};

/// Persisted, non-secret defaults for the clipssh CLIs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    /// Preferred clipboard backend (`auto`, `wayland`, `xclip`, `xsel`).
    pub clipboard_backend: String,
    /// Last-used transport for `sshg`/`sshgd` (`git`, `google-drive`,
    /// `usb-serial`, `audio-modem`).
    pub default_transport: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clipboard_backend: "auto".to_string(),
            default_transport: "git".to_string(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection:
    /// 1. `CLIPSSH_CONFIG_DIR` env var: explicit override.
    /// 2. `CLIPSSH_ENV=test`: a project-local `tmp/clipssh-test` directory.
    /// 3. Default: platform config dir (e.g. `~/.config/clipssh` on Linux).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("CLIPSSH_CONFIG_DIR") {
            PathBuf::from(dir)
        } else if crate::env::is_test_mode() {
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/clipssh-test")
        } else {
            dirs::config_dir()
                .context("could not determine platform config directory")?
                .join(crate::env::APP_NAME)
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, falling back to defaults, then
    /// applying environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_else(|_| Self::default());
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            anyhow::bail!("config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(backend) = std::env::var("CLIPSSH_CLIPBOARD_BACKEND") {
            self.clipboard_backend = backend;
        }
        if let Ok(transport) = std::env::var("CLIPSSH_TRANSPORT") {
            self.default_transport = transport;
        }
    }

    /// Persists the current configuration to disk with owner-only
    /// permissions.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_dir()?.join("config.json");
        fs::write(&path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Path to the persisted Google Drive OAuth refresh token (spec §6).
    pub fn default_drive_token_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("drive-token.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.clipboard_backend, "auto");
        assert_eq!(config.default_transport, "git");
    }

    #[test]
    fn round_trip_serialization() {
        let config = Config {
            clipboard_backend: "xsel".to_string(),
            default_transport: "audio-modem".to_string(),
        };
        let json = serde_json::to_string(&config).unwrap();
        let loaded: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, loaded);
    }
}
