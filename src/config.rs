//! Engine limits, loadable from a JSON document.

use serde::Deserialize;

/// Tunable limits enforced by the namespace. All fields default to the
/// historical contract values and may be overridden from JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Longest permitted path component, in bytes.
    #[serde(default = "default_max_component_length")]
    pub max_component_length: usize,

    /// Most children one directory may hold.
    #[serde(default = "default_max_directory_items")]
    pub max_directory_items: usize,

    /// Most snapshots one snapshottable directory may retain.
    #[serde(default = "default_max_snapshots_per_directory")]
    pub max_snapshots_per_directory: usize,
}

fn default_max_component_length() -> usize {
    255
}

fn default_max_directory_items() -> usize {
    1024 * 1024
}

fn default_max_snapshots_per_directory() -> usize {
    65536
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_component_length: default_max_component_length(),
            max_directory_items: default_max_directory_items(),
            max_snapshots_per_directory: default_max_snapshots_per_directory(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }
}
