//! Configuration for the sequence service

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default time `stop()` waits for in-flight executions
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Lifecycle behaviour of a [`SequenceService`](crate::SequenceService)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// Load every stored execution into the active table on `start()`
    pub restore_on_start: bool,
    /// Save every active execution on `stop()`
    pub flush_on_stop: bool,
    /// How long `stop()` waits for in-flight executions before aborting them
    pub shutdown_grace_ms: u64,
    /// Directory for a file-backed store when no persistence is injected
    pub state_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            restore_on_start: true,
            flush_on_stop: true,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            state_dir: None,
        }
    }
}

impl ServiceConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert!(config.restore_on_start);
        assert!(config.flush_on_stop);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert!(config.state_dir.is_none());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"flushOnStop": false, "stateDir": "/tmp/runs"}"#).unwrap();
        assert!(config.restore_on_start);
        assert!(!config.flush_on_stop);
        assert_eq!(config.shutdown_grace_ms, DEFAULT_SHUTDOWN_GRACE_MS);
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/runs")));
    }
}
