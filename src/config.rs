use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine configuration.
///
/// Every field has a working default; embedders typically set the data
/// directory and the offline-time policy and leave the rest alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StockadeConfig {
    /// Root directory for jail and prisoner documents.
    pub data_dir: PathBuf,

    /// Whether sentences keep counting down while the subject is offline.
    /// When false, a disconnect pauses the sentence instead.
    pub count_offline_time: bool,

    /// Cadence of the sentence clock. Also the upper bound on how much
    /// sentence time a single tick may burn.
    pub tick_interval: Duration,

    /// Group name an external authority uses to mark confined subjects.
    pub confinement_group: String,

    /// Cadence for persisting all live state. None disables autosave.
    pub autosave_interval: Option<Duration>,

    /// How long queued writes get to drain when the engine closes.
    pub shutdown_grace: Duration,
}

impl StockadeConfig {
    /// Create a configuration rooted at the given data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Set the offline-time policy.
    pub fn count_offline_time(mut self, count: bool) -> Self {
        self.count_offline_time = count;
        self
    }

    /// Set the sentence clock cadence.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the confinement group name.
    pub fn confinement_group(mut self, group: impl Into<String>) -> Self {
        self.confinement_group = group.into();
        self
    }

    /// Set the autosave cadence, or None to disable autosave.
    pub fn autosave_interval(mut self, interval: Option<Duration>) -> Self {
        self.autosave_interval = interval;
        self
    }

    /// Set the shutdown flush deadline.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

impl Default for StockadeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            count_offline_time: false,
            tick_interval: Duration::from_secs(1),
            confinement_group: "prisoners".to_string(),
            autosave_interval: Some(Duration::from_secs(300)),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StockadeConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert!(!config.count_offline_time);
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.confinement_group, "prisoners");
    }

    #[test]
    fn test_builder_pattern() {
        let config = StockadeConfig::new("/tmp/stockade")
            .count_offline_time(true)
            .tick_interval(Duration::from_millis(500))
            .confinement_group("inmates")
            .autosave_interval(None)
            .shutdown_grace(Duration::from_secs(5));

        assert_eq!(config.data_dir, PathBuf::from("/tmp/stockade"));
        assert!(config.count_offline_time);
        assert_eq!(config.tick_interval, Duration::from_millis(500));
        assert_eq!(config.confinement_group, "inmates");
        assert!(config.autosave_interval.is_none());
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_config_hydrates_defaults() {
        let config: StockadeConfig =
            serde_json::from_str(r#"{"dataDir":"/srv/stockade","countOfflineTime":true}"#).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/stockade"));
        assert!(config.count_offline_time);
        // everything the document omits comes from the defaults
        assert_eq!(config.confinement_group, "prisoners");
        assert_eq!(config.tick_interval, Duration::from_secs(1));
    }
}
