//! Configuration loading for the relay server and the board client.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::sync::poller::DEFAULT_POLL_INTERVAL;

/// Default location on disk where the binaries look for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TABLETOP_SYNC_CONFIG_PATH";
/// Port the relay listens on when nothing else is configured.
const DEFAULT_PORT: u16 = 8080;
/// Lower bound of the poll period, keeps a typo from hammering the store.
const MIN_POLL_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Relay server settings.
pub struct RelayConfig {
    /// TCP port to listen on.
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Board client settings.
pub struct ClientConfig {
    /// Relay base URL; `None` keeps the client offline.
    pub endpoint: Option<String>,
    /// User id, `guest-<uuid>` when not configured.
    pub user_id: String,
    /// Whether this client acts as the GM.
    pub gm: bool,
    /// Poll period.
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Relay section.
    pub relay: RelayConfig,
    /// Client section.
    pub client: ClientConfig,
}

impl AppConfig {
    /// Load the configuration from disk and apply environment overrides, falling back
    /// to built-in defaults when the file is missing or invalid.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let raw = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded configuration");
                    raw
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    RawConfig::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                RawConfig::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                RawConfig::default()
            }
        };

        raw.with_overrides(|name| env::var(name).ok()).into()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    relay: RawRelay,
    client: RawClient,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRelay {
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawClient {
    endpoint: Option<String>,
    user_id: Option<String>,
    gm: Option<bool>,
    poll_interval_ms: Option<u64>,
}

impl RawConfig {
    /// Apply `PORT`/`SERVER_PORT`, `BOARD_ENDPOINT`, `BOARD_USER` and `BOARD_GM`.
    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(port) = lookup("PORT")
            .or_else(|| lookup("SERVER_PORT"))
            .and_then(|value| value.parse::<u16>().ok())
        {
            self.relay.port = Some(port);
        }
        if let Some(endpoint) = lookup("BOARD_ENDPOINT") {
            self.client.endpoint = Some(endpoint);
        }
        if let Some(user) = lookup("BOARD_USER") {
            self.client.user_id = Some(user);
        }
        if let Some(gm) = lookup("BOARD_GM") {
            self.client.gm = Some(matches!(gm.trim(), "1" | "true" | "yes"));
        }
        self
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let endpoint = value
            .client
            .endpoint
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty());
        let user_id = value
            .client
            .user_id
            .map(|user| user.trim().to_string())
            .filter(|user| !user.is_empty())
            .unwrap_or_else(|| format!("guest-{}", Uuid::new_v4()));
        let poll_interval = value
            .client
            .poll_interval_ms
            .map(|ms| Duration::from_millis(ms.max(MIN_POLL_INTERVAL_MS)))
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        Self {
            relay: RelayConfig {
                port: value.relay.port.unwrap_or(DEFAULT_PORT),
            },
            client: ClientConfig {
                endpoint,
                user_id,
                gm: value.client.gm.unwrap_or(false),
                poll_interval,
            },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
