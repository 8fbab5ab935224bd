use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use vigil_core::{ClusterPolicy, MockMode, RegistrySettings};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Which descriptor provider backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Mock,
    Azure,
    Google,
    Aws,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "azure" => Ok(Self::Azure),
            "google" => Ok(Self::Google),
            "aws" | "rekognition" => Ok(Self::Aws),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Descriptor provider backend (default: mock).
    pub provider: ProviderKind,
    /// Vendor API base URL.
    pub provider_endpoint: Option<String>,
    /// Vendor API key.
    pub provider_api_key: Option<String>,
    /// How the mock provider draws encodings.
    pub mock_mode: MockMode,
    /// Path to the SQLite identity database.
    pub db_path: PathBuf,
    /// Directory for captured query images.
    pub image_dir: PathBuf,
    /// Similarity a query must exceed to be recognized.
    pub acceptance_threshold: f32,
    /// Similarity an unknown face must exceed to join a cluster.
    pub grouping_threshold: f32,
    /// Per-cluster alert cooldown in seconds.
    pub cooldown_secs: u64,
    pub cluster_policy: ClusterPolicy,
    /// Timeout in seconds for one descriptor extraction. Never zero.
    pub extract_timeout_secs: u64,
    /// Webhook target for alerts; alerts are only logged when unset.
    pub webhook_url: Option<String>,
    /// Authorization header value sent with webhook alerts.
    pub webhook_auth: Option<String>,
    pub alert_recipients: Vec<String>,
    pub access_log_capacity: usize,
    pub notification_capacity: usize,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `VIGIL_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Malformed numbers fall back to their defaults; an unknown provider or
    /// cluster policy and a zero extraction timeout are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = get("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("vigil");

        let db_path = get("VIGIL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("identities.db"));
        let image_dir = get("VIGIL_IMAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("captures"));

        let mock_mode = match get("VIGIL_MOCK_MODE").as_deref() {
            Some("content") | Some("content_seeded") => MockMode::ContentSeeded,
            _ => MockMode::Random,
        };

        let provider = match get("VIGIL_PROVIDER") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "VIGIL_PROVIDER",
                reason,
            })?,
            None => ProviderKind::Mock,
        };
        let cluster_policy = match get("VIGIL_CLUSTER_POLICY") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "VIGIL_CLUSTER_POLICY",
                reason,
            })?,
            None => ClusterPolicy::FirstMatch,
        };
        let extract_timeout_secs = parse_or(get("VIGIL_EXTRACT_TIMEOUT_SECS"), 10u64);
        if extract_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "VIGIL_EXTRACT_TIMEOUT_SECS",
                reason: "must be at least 1 second".into(),
            });
        }

        Ok(Self {
            provider,
            provider_endpoint: get("VIGIL_PROVIDER_ENDPOINT"),
            provider_api_key: get("VIGIL_PROVIDER_API_KEY"),
            mock_mode,
            db_path,
            image_dir,
            acceptance_threshold: unit_f32(get("VIGIL_ACCEPTANCE_THRESHOLD"), vigil_core::ACCEPTANCE_THRESHOLD),
            grouping_threshold: unit_f32(get("VIGIL_GROUPING_THRESHOLD"), vigil_core::GROUPING_THRESHOLD),
            cooldown_secs: parse_or(get("VIGIL_COOLDOWN_SECS"), vigil_core::DEFAULT_COOLDOWN.as_secs()),
            cluster_policy,
            extract_timeout_secs,
            webhook_url: get("VIGIL_WEBHOOK_URL"),
            webhook_auth: get("VIGIL_WEBHOOK_AUTH"),
            alert_recipients: parse_recipients(
                &get("VIGIL_ALERT_RECIPIENTS").unwrap_or_else(|| "admin@company.com".into()),
            ),
            access_log_capacity: parse_or(get("VIGIL_ACCESS_LOG_CAPACITY"), 1000),
            notification_capacity: parse_or(
                get("VIGIL_NOTIFICATION_CAPACITY"),
                vigil_core::notify::DEFAULT_FEED_CAPACITY,
            ),
            session_bus: get("VIGIL_SESSION_BUS").is_some_and(|v| v != "0"),
        })
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            acceptance_threshold: self.acceptance_threshold,
            grouping_threshold: self.grouping_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            cluster_policy: self.cluster_policy,
            access_log_capacity: self.access_log_capacity,
            notification_capacity: self.notification_capacity,
        }
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Parse a threshold, clamped to [0, 1].
fn unit_f32(raw: Option<String>, default: f32) -> f32 {
    let value: f32 = parse_or(raw, default);
    if value.is_nan() {
        default
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
pub(crate) fn test_config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
    let vars: std::collections::HashMap<String, String> =
        vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    Config::from_lookup(|key| vars.get(key).cloned())
}
