use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use swarm_model::TargetId;

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
const DEFAULT_HEARTBEAT_MARGIN_SECS: u64 = 10;
const DEFAULT_RETENTION_WINDOW: usize = 100;
const DEFAULT_DATABASE: &str = "swarm.db";

/// Process-wide configuration, loaded once and read-only afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub target_groups: BTreeMap<String, Vec<TargetId>>,
    pub client: ClientSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub heartbeat_interval_secs: u64,
    pub heartbeat_margin_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            heartbeat_margin_secs: DEFAULT_HEARTBEAT_MARGIN_SECS,
        }
    }
}

impl ClientSettings {
    pub fn new(interval: Duration, margin: Duration) -> Self {
        Self {
            heartbeat_interval_secs: interval.as_secs(),
            heartbeat_margin_secs: margin.as_secs(),
        }
    }

    /// How long a client may stay silent before its leases are reclaimed.
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(
            self.heartbeat_interval_secs
                .saturating_add(self.heartbeat_margin_secs),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database: PathBuf,
    pub retention_window: usize,
    pub artifact_root: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            retention_window: DEFAULT_RETENTION_WINDOW,
            artifact_root: None,
        }
    }
}

impl SwarmConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)
            .with_context(|| format!("reading configuration from {}", path.display()))?;
        Self::from_yaml(&body).with_context(|| format!("loading {}", path.display()))
    }

    pub fn from_yaml(body: &str) -> Result<Self> {
        let config: SwarmConfig =
            serde_yaml::from_str(body).context("parsing configuration YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.retention_window == 0 {
            bail!("storage.retention_window must be at least 1");
        }
        if self.target_groups.keys().any(|name| name.is_empty()) {
            bail!("target group names must be non-empty");
        }
        Ok(())
    }

    pub fn with_group<I, T>(mut self, name: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TargetId>,
    {
        self.target_groups
            .insert(name.into(), targets.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_retention_window(mut self, window: usize) -> Self {
        self.storage.retention_window = window.max(1);
        self
    }

    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage.artifact_root = Some(root.into());
        self
    }

    pub fn with_client(mut self, client: ClientSettings) -> Self {
        self.client = client;
        self
    }
}
