use serde::{Deserialize, Serialize};

/// Chunked compression applied to saved packages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// zstd compression level.
    pub level: i32,
    /// Adjacent exports are merged until a chunk reaches this size.
    pub min_chunk_size: usize,
    /// No chunk grows beyond this size; larger exports are split.
    pub max_chunk_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 3,
            min_chunk_size: 32 * 1024,
            max_chunk_size: 128 * 1024,
        }
    }
}

/// Linker configuration for loading and saving.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Exports hashed per step of the export hash build.
    pub export_hash_step: usize,
    /// Match exports against objects already in memory when a linker is
    /// created (editor mode).
    pub find_existing_exports: bool,
    /// Save properties in the untagged binary layout and mark the package
    /// as cooked.
    pub binary_properties: bool,
    /// Leave editor-only properties out of saved packages.
    pub filter_editor_only: bool,
    pub compression: CompressionConfig,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            export_hash_step: 1024,
            find_existing_exports: false,
            binary_properties: false,
            filter_editor_only: false,
            compression: CompressionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_with_defaults() {
        let config: LinkerConfig =
            serde_json::from_str(r#"{"compression": {"enabled": true, "max_chunk_size": 4096}}"#).unwrap();
        assert!(config.compression.enabled);
        assert_eq!(config.compression.max_chunk_size, 4096);
        assert_eq!(config.compression.min_chunk_size, 32 * 1024);
        assert_eq!(config.export_hash_step, 1024);

        let json = serde_json::to_string(&config).unwrap();
        let back: LinkerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
