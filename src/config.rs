use crate::transport::reserved_value;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Static subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Cluster-stream tag this subscriber delivers. Must not be the
    /// transport's reserved no-filter value.
    pub cluster_stream_id: u32,
    /// Namespace under which callers register subscriber metrics.
    #[serde(default = "default_metrics_namespace")]
    pub metrics_namespace: String,
}

fn default_metrics_namespace() -> String {
    "commitstream".to_string()
}

impl SubscriberConfig {
    pub fn new(cluster_stream_id: u32) -> Self {
        Self {
            cluster_stream_id,
            metrics_namespace: default_metrics_namespace(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_stream_id == reserved_value::NO_FILTER {
            return Err(ConfigError::NoFilterStreamId);
        }
        Ok(())
    }
}

/// JSON-backed config file with atomic persist.
#[derive(Debug, Clone)]
pub struct SubscriberConfigStore {
    path: PathBuf,
}

impl SubscriberConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<SubscriberConfig, ConfigError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let config: SubscriberConfig = serde_json::from_slice(&bytes)?;
                config.validate()?;
                Ok(config)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(ConfigError::Missing {
                path: self.path.clone(),
            }),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    pub fn persist(&self, config: &SubscriberConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        let payload = serde_json::to_vec_pretty(config)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        fs::rename(tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cluster stream id must not be 0 (reserved as the transport's no-filter value)")]
    NoFilterStreamId,
    #[error("config file not found at {path}")]
    Missing { path: PathBuf },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
