//! Optional TOML configuration for `bagsync sync --config <file>`.
//!
//! # Example
//!
//! ```toml
//! [sync]
//! jobs = 2
//! retries = 3
//! bag_root = "/srv/archives"
//! timeout_secs = 120
//!
//! [metadata]
//! env_prefix = "BAGIT_"
//!
//! [metadata.values]
//! Source-Organization = ["University of South Florida"]
//! Contact-Email = ["data@example.org", "ops@example.org"]
//! ```
//!
//! Command-line flags win over the file. Static metadata values are listed
//! ahead of values found in the environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bagsync_core::metadata::{MetadataConfig, MetadataField, RawFieldValues};
use serde::{Deserialize, Serialize};

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub metadata: MetadataSettings,
}

/// `[sync]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    pub jobs: Option<usize>,
    pub retries: Option<u32>,
    /// Directory under which default-named bags are created.
    pub bag_root: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

/// `[metadata]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataSettings {
    pub env_prefix: Option<String>,
    /// Canonical field name → values.
    #[serde(default)]
    pub values: BTreeMap<String, Vec<String>>,
}

// ── Loading ───────────────────────────────────────────────────────────────────

pub fn read_config(path: &Path) -> Result<FileConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;

    toml::from_str(&content).map_err(|e| format!("could not parse '{}': {}", path.display(), e))
}

impl MetadataSettings {
    /// Metadata config with this file's prefix override applied.
    pub fn metadata_config(&self) -> MetadataConfig {
        let mut config = MetadataConfig::default();
        if let Some(prefix) = &self.env_prefix {
            config.env_prefix = prefix.clone();
        }
        config
    }

    /// Seed raw values from `[metadata.values]`.
    ///
    /// Each value gets a `config.<n>` suffix. Call before merging environment
    /// values so file values come first.
    pub fn seed(&self, raw: &mut RawFieldValues) -> Result<(), String> {
        for (name, values) in &self.values {
            let field = MetadataField::from_canonical_name(name)
                .filter(|f| MetadataField::OPERATOR_FIELDS.contains(f))
                .ok_or_else(|| format!("unknown metadata field '{}' in [metadata.values]", name))?;
            for (i, value) in values.iter().enumerate() {
                raw.insert(field.base_name(), format!("config.{}", i), value.clone());
            }
        }
        Ok(())
    }
}
