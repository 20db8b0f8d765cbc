//! Graph configuration

use crate::graph::{GraphError, GraphResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Graph configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Name used for the save worker thread and in logs
    pub name: String,
    /// Data directory for the RocksDB store (None = in-memory only)
    pub data_path: Option<PathBuf>,
    /// Notify observers after commits
    pub dispatch_events: bool,
    /// Log a summary line at info level for every commit
    pub log_commits: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            name: "nodegraph".to_string(),
            data_path: None,
            dispatch_events: true,
            log_commits: true,
        }
    }
}

impl GraphConfig {
    /// Configuration backed by RocksDB at `path`
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_yaml_str(yaml: &str) -> GraphResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| GraphError::Config(e.to_string()))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> GraphResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> GraphResult<String> {
        serde_yaml::to_string(self).map_err(|e| GraphError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.name, "nodegraph");
        assert!(config.data_path.is_none());
        assert!(config.dispatch_events);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = GraphConfig::from_yaml_str("name: notes\ndata_path: /tmp/notes\n").unwrap();
        assert_eq!(config.name, "notes");
        assert_eq!(config.data_path, Some(PathBuf::from("/tmp/notes")));
        assert!(config.dispatch_events);
        assert!(config.log_commits);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = GraphConfig {
            dispatch_events: false,
            ..GraphConfig::persistent("data")
        };
        let yaml = config.to_yaml().unwrap();
        assert_eq!(GraphConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_invalid_yaml() {
        let err = GraphConfig::from_yaml_str("dispatch_events: [").unwrap_err();
        assert!(matches!(err, GraphError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = GraphConfig::from_yaml_file("/nonexistent/nodegraph.yaml").unwrap_err();
        assert!(matches!(err, GraphError::Io(_)));
    }
}
