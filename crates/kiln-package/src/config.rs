use std::path::Path;

use kiln_linker::LinkerConfig;
use kiln_object::GcConfig;
use serde::{Deserialize, Serialize};

use crate::error::PackageResult;

/// Configuration for a [`Runtime`](crate::Runtime).
///
/// Every section is optional in TOML; missing keys take their defaults.
///
/// ```toml
/// [gc]
/// purge_time_limit_ms = 4
///
/// [linker]
/// binary_properties = false
///
/// [linker.compression]
/// enabled = true
/// level = 9
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub gc: GcConfig,
    pub linker: LinkerConfig,
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> PackageResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> PackageResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::PackageError;

    #[test]
    fn empty_toml_is_default() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn partial_sections() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [gc]
            purge_time_limit_ms = 4

            [linker.compression]
            enabled = true
            min_chunk_size = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.gc.purge_time_limit(), Some(Duration::from_millis(4)));
        assert_eq!(config.gc.max_objects_not_considered_by_gc, 1024);
        assert!(config.linker.compression.enabled);
        assert_eq!(config.linker.compression.min_chunk_size, 64);
        assert_eq!(
            config.linker.compression.max_chunk_size,
            LinkerConfig::default().compression.max_chunk_size
        );
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = RuntimeConfig::from_toml_str("[gc\npurge = ").unwrap_err();
        assert!(matches!(err, PackageError::Config(_)));
        assert!(err.to_string().starts_with("configuration error"));
    }

    #[test]
    fn from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.toml");
        std::fs::write(&path, "[linker]\nexport_hash_step = 8\n").unwrap();
        let config = RuntimeConfig::from_file(&path).unwrap();
        assert_eq!(config.linker.export_hash_step, 8);

        let missing = RuntimeConfig::from_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, PackageError::Io(_)));
    }
}
