//! Orchestrator configuration (YAML loading and validation)

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const MAX_BULK_SIZE_LIMIT: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Name used in logs; generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Work sets waiting for the executor before `submit` has to wait.
    pub queue_size: usize,

    /// Work sets processed in one batch, at most.
    pub max_work_sets_per_batch: usize,

    /// Bulkable works combined into one bulk call, at most.
    pub max_bulk_size: usize,

    /// Minimum delay between two batch-end commits; every batch commits when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_interval_ms: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            name: None,
            queue_size: 1000,
            max_work_sets_per_batch: 100,
            max_bulk_size: 250,
            commit_interval_ms: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval_ms = Some(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn commit_interval(&self) -> Option<Duration> {
        self.commit_interval_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        check_range("queue_size", self.queue_size, 1, usize::MAX)?;
        check_range(
            "max_work_sets_per_batch",
            self.max_work_sets_per_batch,
            1,
            usize::MAX,
        )?;
        check_range("max_bulk_size", self.max_bulk_size, 1, MAX_BULK_SIZE_LIMIT)?;

        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(OrchestratorError::config("name must not be blank"));
            }
        }
        Ok(())
    }
}

fn check_range(field: &str, value: usize, min: usize, max: usize) -> Result<()> {
    if value < min || value > max {
        return Err(OrchestratorError::config(format!(
            "{field} = {value} is out of range [{min}, {max}]"
        )));
    }
    Ok(())
}
