//! Application configuration
//!
//! Settings come from three layers, later layers win: values baked in at
//! build time (`SPOTIFY_CLIENT_ID` / `SPOTIFY_REDIRECT_URI` in the build
//! environment), `config.toml` in the config directory, and the runtime
//! environment.

use anyhow::{bail, Context, Result};
use oauth2::{AuthUrl, ClientId, RedirectUrl, TokenUrl};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::api::client::DEFAULT_API_BASE;
use crate::store;

const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";
const DEFAULT_SCOPES: &str = "streaming user-read-playback-state user-modify-playback-state";
const DEFAULT_DEVICE_NAME: &str = "Hidden Player";
const DEFAULT_CONTEXT_URI: &str = "spotify:playlist:37i9dQZF1DX4WgZiuR77Ef";
const ACCOUNTS_URL: &str = "https://accounts.spotify.com";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Spotify application client ID (public client, no secret)
    pub client_id: String,
    /// Registered redirect URI
    pub redirect_uri: String,
    /// Space-separated OAuth scopes
    pub scopes: String,
    /// Name of the Connect device to wait for
    pub device_name: String,
    /// Context URI prefilled in the TUI
    pub default_context_uri: String,
    /// Accounts service base URL
    pub accounts_url: String,
    /// Web API base URL
    pub api_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: option_env!("SPOTIFY_CLIENT_ID").unwrap_or("").to_string(),
            redirect_uri: option_env!("SPOTIFY_REDIRECT_URI")
                .unwrap_or(DEFAULT_REDIRECT_URI)
                .to_string(),
            scopes: DEFAULT_SCOPES.to_string(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            default_context_uri: DEFAULT_CONTEXT_URI.to_string(),
            accounts_url: ACCOUNTS_URL.to_string(),
            api_url: DEFAULT_API_BASE.to_string(),
        }
    }
}

/// Validated OAuth endpoints and client identity.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: ClientId,
    pub redirect_uri: RedirectUrl,
    pub auth_url: AuthUrl,
    pub token_url: TokenUrl,
    pub scopes: String,
}

impl Config {
    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(store::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Override fields from environment lookups.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields: [(&str, &mut String); 6] = [
            ("SPOTIFY_CLIENT_ID", &mut self.client_id),
            ("SPOTIFY_REDIRECT_URI", &mut self.redirect_uri),
            ("SPOTIFY_SCOPES", &mut self.scopes),
            ("HIDDEN_PLAYER_DEVICE_NAME", &mut self.device_name),
            ("SPOTIFY_ACCOUNTS_URL", &mut self.accounts_url),
            ("SPOTIFY_API_URL", &mut self.api_url),
        ];

        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *field = value;
            }
        }
    }

    /// Validate the OAuth part of the configuration.
    pub fn oauth(&self) -> Result<OAuthSettings> {
        if self.client_id.trim().is_empty() {
            bail!(
                "No Spotify client ID configured. Set SPOTIFY_CLIENT_ID or add client_id to {}",
                Self::config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "config.toml".to_string())
            );
        }

        let accounts = self.accounts_url.trim_end_matches('/');
        Ok(OAuthSettings {
            client_id: ClientId::new(self.client_id.clone()),
            redirect_uri: RedirectUrl::new(self.redirect_uri.clone())
                .context("Invalid redirect URI")?,
            auth_url: AuthUrl::new(format!("{}/authorize", accounts))
                .context("Invalid accounts URL")?,
            token_url: TokenUrl::new(format!("{}/api/token", accounts))
                .context("Invalid accounts URL")?,
            scopes: self.scopes.clone(),
        })
    }
}
