use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Garbage collector configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Size of the low slot range reserved for objects that are never
    /// considered by the collector.
    pub max_objects_not_considered_by_gc: usize,
    /// Wall-clock budget for one incremental purge step. `None` purges to
    /// completion.
    pub purge_time_limit_ms: Option<u64>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_objects_not_considered_by_gc: 1024,
            purge_time_limit_ms: None,
        }
    }
}

impl GcConfig {
    pub fn purge_time_limit(&self) -> Option<Duration> {
        self.purge_time_limit_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GcConfig::default();
        assert_eq!(config.max_objects_not_considered_by_gc, 1024);
        assert_eq!(config.purge_time_limit(), None);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: GcConfig = serde_json::from_str(r#"{"purge_time_limit_ms": 5}"#).unwrap();
        assert_eq!(config.max_objects_not_considered_by_gc, 1024);
        assert_eq!(config.purge_time_limit(), Some(Duration::from_millis(5)));
    }
}
