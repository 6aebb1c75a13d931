use crate::models::MetricKey;
use crate::panels::{PanelSettings, SortDirection};
use crate::session::{RetryPolicy, SessionSettings};
use crate::visualization::VisualizationKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

pub const CONFIG_ENV: &str = "CLUSTERVIZ_CONFIG";
pub const SERVER_URL_ENV: &str = "CLUSTERVIZ_SERVER_URL";
pub const SIMULATOR_ENV: &str = "CLUSTERVIZ_SIMULATOR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerConf,
    pub poll: PollConf,
    pub dashboard: DashboardConf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConf {
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Simulator to switch to right after subscribing.
    pub simulator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConf {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConf {
    pub default_visualization: VisualizationKind,
    pub ranking_metric: MetricKey,
    pub ranking_direction: SortDirection,
    pub ranking_size: usize,
    pub feed_size: usize,
    pub color_data_set: Option<MetricKey>,
    pub size_data_set: Option<MetricKey>,
}

impl Default for ServerConf {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            request_timeout_secs: 30,
            simulator: None,
        }
    }
}

impl Default for PollConf {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl Default for DashboardConf {
    fn default() -> Self {
        Self {
            default_visualization: VisualizationKind::Tree,
            ranking_metric: MetricKey::Health,
            ranking_direction: SortDirection::Ascending,
            ranking_size: 10,
            feed_size: 20,
            color_data_set: None,
            size_data_set: None,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs.max(1))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            default_visualization: self.dashboard.default_visualization,
            panels: PanelSettings {
                ranking_metric: self.dashboard.ranking_metric,
                ranking_direction: self.dashboard.ranking_direction,
                ranking_size: self.dashboard.ranking_size,
                feed_size: self.dashboard.feed_size,
            },
            retry: RetryPolicy {
                max_retries: self.poll.max_retries,
                initial_backoff: Duration::from_millis(self.poll.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.poll.max_backoff_ms),
            },
        }
    }

    /// Overrides from `CLUSTERVIZ_SERVER_URL` / `CLUSTERVIZ_SIMULATOR`, read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(SERVER_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.server.base_url = url;
        }
        if let Some(simulator) = lookup(SIMULATOR_ENV).filter(|v| !v.trim().is_empty()) {
            self.server.simulator = Some(simulator);
        }
    }
}

pub async fn load_config_from(path: &Path) -> Result<ClientConfig, ConfigError> {
    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if txt.trim().is_empty() {
        return Ok(ClientConfig::default());
    }
    serde_yaml::from_str(&txt).map_err(|source| ConfigError::Yaml {
        path: path.display().to_string(),
        source,
    })
}

/// Loads `clusterviz.yaml` (or `$CLUSTERVIZ_CONFIG`) and applies environment overrides.
/// Falls back to defaults when the file is missing or invalid.
pub async fn load_config() -> ClientConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "clusterviz.yaml".into());
    let mut config = if Path::new(&path).exists() {
        load_config_from(Path::new(&path)).await.unwrap_or_else(|e| {
            warn!("[config] {}, using defaults", e);
            ClientConfig::default()
        })
    } else {
        warn!("[config] no {}, using defaults", path);
        ClientConfig::default()
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    config
}
