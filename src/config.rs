//! TOML configuration for the cellwatch daemon.
//!
//! Every section has defaults, so a partial file (or no file at all) is a
//! valid configuration. Read once at startup and immutable afterwards.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CELLWATCH_CONFIG";
/// Standard system location of the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/cellwatch/cellwatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellwatchConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ml: MlConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CellwatchConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration, in order:
    /// 1. `explicit` (the `--config` flag). A bad explicit file is an error.
    /// 2. The path in `CELLWATCH_CONFIG`.
    /// 3. `/etc/cellwatch/cellwatch.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        Ok(Self::load_or_default())
    }

    /// Steps 2 to 4 of [`CellwatchConfig::resolve`]. Unreadable files are
    /// logged and skipped.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "CELLWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.request_timeout_secs == 0 {
            bail!("server.request_timeout_secs must be at least 1");
        }
        if self.ml.window_size == 0 {
            bail!("ml.window_size must be at least 1");
        }
        if !self.ml.anomaly_threshold.is_finite() {
            bail!("ml.anomaly_threshold must be a finite number");
        }
        if self.alerts.topic_prefix.is_empty() {
            bail!("alerts.topic_prefix must not be empty");
        }
        if self.alerts.username.is_some() && self.alerts.token.is_some() {
            bail!("alerts.username and alerts.token are mutually exclusive");
        }
        if self.alerts.password.is_some() && self.alerts.username.is_none() {
            bail!("alerts.password requires alerts.username");
        }
        if self.storage.backend == StorageBackend::Influx {
            let influx = &self.storage.influx;
            if influx.url.is_empty() || influx.bucket.is_empty() || influx.org.is_empty() {
                bail!("storage.influx requires url, org and bucket");
            }
        }
        if self.server.api_key.is_empty() {
            warn!("server.api_key is empty, every ingest request will be rejected");
        }
        Ok(())
    }

    /// Copy with every credential replaced, safe to print.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        redact(&mut config.server.api_key);
        redact(&mut config.storage.influx.token);
        for secret in [&mut config.alerts.password, &mut config.alerts.token] {
            if let Some(value) = secret.as_mut() {
                redact(value);
            }
        }
        config
    }
}

const REDACTED: &str = "<redacted>";

fn redact(value: &mut String) {
    if !value.is_empty() {
        *value = REDACTED.to_string();
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP listener and ingress credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Shared bearer credential required on `POST /ingest`.
    pub api_key: String,
    /// Upper bound on the read endpoints. `/ingest` is bounded by the sink
    /// client timeouts instead.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            api_key: String::new(),
            request_timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// ML
// ---------------------------------------------------------------------------

/// Windowing, threshold and model artifact locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MlConfig {
    pub window_size: usize,
    /// Scores at or above this value raise an alert.
    pub anomaly_threshold: f64,
    /// Reconstruction model (`.json` quantized artifact or `.onnx`).
    pub model_artifact_path: Option<PathBuf>,
    /// Fitted isolation forest.
    pub fallback_artifact_path: PathBuf,
    /// Use an untrained isolation forest when no fitted one exists.
    pub untrained_fallback: bool,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            window_size: 12,
            anomaly_threshold: 0.6,
            model_artifact_path: None,
            fallback_artifact_path: PathBuf::from("models/iforest.json"),
            untrained_fallback: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Alert fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
    /// Alerts go to `{topic_prefix}/alerts/{device}`.
    pub topic_prefix: String,
    /// Base URL of an HTTP message bridge. Unset means alerts are only logged.
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
    /// Basic auth credentials for the bridge. `password` needs `username`.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Bearer token for the bridge. Mutually exclusive with `username`.
    pub token: Option<String>,
    /// Extra PEM root certificate trusted for an `https` bridge.
    pub ca_file: Option<PathBuf>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            topic_prefix: "smartprison".to_string(),
            webhook_url: None,
            timeout_secs: 5,
            username: None,
            password: None,
            token: None,
            ca_file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Local SQLite database.
    Sqlite,
    /// InfluxDB v2 HTTP write API.
    Influx,
    /// In-process buffer, lost on exit.
    Memory,
}

/// Time-series sink selection and connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub sqlite_path: PathBuf,
    pub influx: InfluxConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            sqlite_path: PathBuf::from("data/cellwatch.db"),
            influx: InfluxConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub timeout_secs: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: "cellwatch".to_string(),
            bucket: "sensors".to_string(),
            timeout_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = CellwatchConfig::default();

        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert!(cfg.server.api_key.is_empty());
        assert_eq!(cfg.server.request_timeout_secs, 10);

        assert_eq!(cfg.ml.window_size, 12);
        assert_eq!(cfg.ml.anomaly_threshold, 0.6);
        assert!(cfg.ml.model_artifact_path.is_none());
        assert_eq!(cfg.ml.fallback_artifact_path, PathBuf::from("models/iforest.json"));
        assert!(cfg.ml.untrained_fallback);

        assert!(cfg.alerts.enabled);
        assert_eq!(cfg.alerts.topic_prefix, "smartprison");
        assert!(cfg.alerts.webhook_url.is_none());

        assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
        assert_eq!(cfg.storage.sqlite_path, PathBuf::from("data/cellwatch.db"));

        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[server]
bind = "127.0.0.1:9000"
api_key = "s3cret"

[ml]
window_size = 24
anomaly_threshold = 0.75
model_artifact_path = "/opt/cellwatch/autoencoder.json"
untrained_fallback = false

[alerts]
topic_prefix = "facility-a"
webhook_url = "http://broker.local:8080/topics"

[storage]
backend = "influx"

[storage.influx]
url = "http://influx.local:8086"
token = "tok"
org = "ops"
bucket = "edge"

[logging]
level = "debug"
json = true
"#;

        let cfg: CellwatchConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
        assert_eq!(cfg.server.api_key, "s3cret");
        assert_eq!(cfg.ml.window_size, 24);
        assert_eq!(cfg.ml.anomaly_threshold, 0.75);
        assert_eq!(
            cfg.ml.model_artifact_path,
            Some(PathBuf::from("/opt/cellwatch/autoencoder.json"))
        );
        assert!(!cfg.ml.untrained_fallback);
        assert_eq!(cfg.alerts.topic_prefix, "facility-a");
        assert_eq!(
            cfg.alerts.webhook_url.as_deref(),
            Some("http://broker.local:8080/topics")
        );
        assert_eq!(cfg.storage.backend, StorageBackend::Influx);
        assert_eq!(cfg.storage.influx.url, "http://influx.local:8086");
        assert_eq!(cfg.storage.influx.bucket, "edge");
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[ml]
window_size = 6
"#;

        let cfg: CellwatchConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.ml.window_size, 6);
        assert_eq!(cfg.ml.anomaly_threshold, 0.6);
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.alerts.topic_prefix, "smartprison");
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut cfg = CellwatchConfig::default();
        cfg.ml.window_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_request_timeout() {
        let mut cfg = CellwatchConfig::default();
        cfg.server.request_timeout_secs = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs"));
    }

    #[test]
    fn test_validate_alert_credentials() {
        let mut cfg = CellwatchConfig::default();
        cfg.alerts.password = Some("pw".to_string());
        assert!(cfg.validate().is_err());

        cfg.alerts.username = Some("edge".to_string());
        assert!(cfg.validate().is_ok());

        cfg.alerts.token = Some("tok".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_redacted_hides_credentials() {
        let mut cfg = CellwatchConfig::default();
        cfg.server.api_key = "s3cret".to_string();
        cfg.storage.influx.token = "influx-tok".to_string();
        cfg.alerts.username = Some("edge".to_string());
        cfg.alerts.password = Some("hunter2".to_string());

        let shown = toml::to_string_pretty(&cfg.redacted()).unwrap();

        for secret in ["s3cret", "influx-tok", "hunter2"] {
            assert!(!shown.contains(secret), "{secret} leaked");
        }
        assert!(shown.contains("api_key = \"<redacted>\""));
        assert!(shown.contains("username = \"edge\""));
        // Unset credentials stay visibly unset.
        assert!(CellwatchConfig::default().redacted().server.api_key.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellwatch.toml");
        std::fs::write(&path, "[server]\napi_key = \"k\"\n").unwrap();

        let cfg = CellwatchConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.server.api_key, "k");

        assert!(CellwatchConfig::resolve(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
