use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::http::DEFAULT_USER_AGENT;
use crate::model::ServiceFamily;

pub const DEFAULT_WFS_VERSIONS: [&str; 3] = ["2.0.0", "1.1.0", "1.0.0"];
pub const DEFAULT_WMS_VERSIONS: [&str; 2] = ["1.3.0", "1.1.1"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Candidate WFS versions, highest priority first.
    pub wfs_versions: Vec<String>,
    /// Candidate WMS versions, highest priority first.
    pub wms_versions: Vec<String>,
    /// Timeout for each GetCapabilities attempt.
    pub attempt_timeout_secs: u64,
    /// Skip TLS certificate validation.
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            wfs_versions: DEFAULT_WFS_VERSIONS.iter().map(|v| v.to_string()).collect(),
            wms_versions: DEFAULT_WMS_VERSIONS.iter().map(|v| v.to_string()).collect(),
            attempt_timeout_secs: 10,
            accept_invalid_certs: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl NegotiationConfig {
    pub fn candidates(&self, family: ServiceFamily) -> &[String] {
        match family {
            ServiceFamily::Wfs => &self.wfs_versions,
            ServiceFamily::Wms => &self.wms_versions,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Quiet period without progress change before a session is READY.
    pub debounce_ms: u64,
    /// How long a session may report zero progress and no extent.
    pub grace_period_ms: u64,
    /// Age after which the sweep evicts a session regardless of state.
    pub max_age_secs: u64,
    /// Interval of the background sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            grace_period_ms: 2000,
            max_age_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

impl ReadinessConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub negotiation: NegotiationConfig,
    pub readiness: ReadinessConfig,
}

impl Settings {
    /// Loads settings from a YAML file. Omitted keys keep their defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.negotiation.wfs_versions.is_empty() || self.negotiation.wms_versions.is_empty() {
            return Err(ConfigError::Invalid(
                "candidate version lists must not be empty".to_string(),
            ));
        }
        if self.negotiation.attempt_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "attempt_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.readiness.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
