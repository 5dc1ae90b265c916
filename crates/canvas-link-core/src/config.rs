//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default origin used when no backend is configured, or when the configured
/// backend is rejected.
pub const DEFAULT_PAGE_ORIGIN: &str = "http://localhost:877";

/// Top-level canvas-link configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend origin, e.g. `https://qntx.example.org`. Only `http` and
    /// `https` are accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Origin the client itself is served from. Used when `url` is absent or
    /// rejected.
    #[serde(default = "default_page_origin")]
    pub page_origin: String,
}

fn default_page_origin() -> String {
    DEFAULT_PAGE_ORIGIN.into()
}

/// Reconnect backoff tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// First reconnect delay in milliseconds (default: 3000).
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Upper bound on the un-jittered reconnect delay (default: 60000).
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,

    /// Maximum jitter as a fraction of the delay (default: 0.2).
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_reconnect_base_ms() -> u64 {
    3_000
}

fn default_reconnect_cap_ms() -> u64 {
    60_000
}

fn default_jitter_ratio() -> f64 {
    0.2
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How long startup waits for the remote canvas snapshot (default: 3000).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_timeout_ms: Option<u64>,

    /// Directory holding `canvas.json` and `sync_queue.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "canvas_link_transport=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::CanvasLinkError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        json5::from_str(&substituted)
            .map_err(|e| crate::error::CanvasLinkError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Configured backend origin, if any.
    pub fn backend_url(&self) -> Option<&str> {
        self.backend.as_ref().and_then(|b| b.url.as_deref())
    }

    /// Origin to fall back to when the backend origin is missing or rejected.
    pub fn page_origin(&self) -> &str {
        self.backend
            .as_ref()
            .map(|b| b.page_origin.as_str())
            .unwrap_or(DEFAULT_PAGE_ORIGIN)
    }

    /// Origin used for HTTP calls: the backend when it is a valid http(s)
    /// URL, else the page origin.
    pub fn http_origin(&self) -> &str {
        match self.backend_url() {
            Some(url) if is_http_origin(url) => url,
            _ => self.page_origin(),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        self.transport.clone().unwrap_or_default()
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.transport().reconnect_base_ms)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_millis(self.transport().reconnect_cap_ms)
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.transport().jitter_ratio
    }

    pub fn snapshot_timeout(&self) -> Duration {
        let ms = self
            .sync
            .as_ref()
            .and_then(|s| s.snapshot_timeout_ms)
            .unwrap_or(3_000);
        Duration::from_millis(ms)
    }

    /// Directory for the local canvas snapshot and the outbound sync queue.
    pub fn sync_dir(&self) -> PathBuf {
        self.sync
            .as_ref()
            .and_then(|s| s.data_dir.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("canvas"))
    }

    /// Get a config value by dotted path (e.g. "transport.reconnect_base_ms").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(url) = self.backend_url() {
            if !is_http_origin(url) {
                warnings.push(format!(
                    "Backend url '{url}' is not an http(s) origin; the page origin will be used"
                ));
            }
        }

        if !is_http_origin(self.page_origin()) {
            errors.push(format!(
                "Page origin '{}' must be an http(s) origin",
                self.page_origin()
            ));
        }

        let transport = self.transport();
        if transport.reconnect_base_ms == 0 {
            errors.push("transport.reconnect_base_ms cannot be 0".to_string());
        }
        if transport.reconnect_cap_ms < transport.reconnect_base_ms {
            errors.push("transport.reconnect_cap_ms must be >= reconnect_base_ms".to_string());
        }
        if !(0.0..=1.0).contains(&transport.jitter_ratio) {
            errors.push("transport.jitter_ratio must be within 0.0..=1.0".to_string());
        }

        if self.snapshot_timeout().is_zero() {
            warnings.push(
                "sync.snapshot_timeout_ms is 0; reconciliation will always take the offline path"
                    .to_string(),
            );
        }

        (warnings, errors)
    }
}

/// True when `origin` parses as a URL with an `http` or `https` scheme.
pub fn is_http_origin(origin: &str) -> bool {
    url::Url::parse(origin)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Base directory for canvas-link data: `~/.canvas_link/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".canvas_link")
}
