//! Edge node configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/fireline/edged.toml`
//! - Windows: `%APPDATA%/fireline/edged.toml`
//!
//! Deployment knobs can be overridden via environment:
//! `FIRELINE_PORT` and `FIRELINE_DEDUP_TTL_MS`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use fireline_protocol::constants::{DEDUP_TTL_MS, DEFAULT_PORT};

/// Edge node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Display name of this edge node (hostname by default).
    #[serde(default = "default_name")]
    pub name: String,

    /// WebSocket listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Dedup effect window in milliseconds.
    #[serde(default = "default_dedup_ttl_ms")]
    pub dedup_ttl_ms: u64,
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "Fireline Edge".into())
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_dedup_ttl_ms() -> u64 {
    DEDUP_TTL_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            port: default_port(),
            dedup_ttl_ms: default_dedup_ttl_ms(),
        }
    }
}

impl Config {
    /// Loads configuration from disk (creating a default file on first
    /// run), then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path()?;

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Saves the current configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("FIRELINE_PORT")
            && let Ok(port) = port.parse()
        {
            self.port = port;
        }
        if let Ok(ttl) = std::env::var("FIRELINE_DEDUP_TTL_MS")
            && let Ok(ttl) = ttl.parse()
        {
            self.dedup_ttl_ms = ttl;
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("fireline").join("edged.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("fireline")
            .join("edged.toml"))
    }
}
