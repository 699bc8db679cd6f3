//! Effective settings with full provenance
//!
//! The effective settings capture the merged job defaults plus
//! information about where each layer came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use clusterjob_backends::BackendError;

use super::defaults::JobDefaults;
use super::merge::merge_layers;

/// Schema version for effective settings
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "clusterjob/effective_settings@1";

/// Top-level tables of a settings file
const SECTIONS: &[&str] = &["attributes", "resources", "variables"];

/// Origin of a settings layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing settings layer with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    /// Origin of this source
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged settings with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveSettings {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// When these settings were computed
    pub created_at: DateTime<Utc>,

    /// The merged settings object
    pub settings: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

impl EffectiveSettings {
    /// Build effective settings from builtin defaults, settings files (in
    /// order, later files win) and CLI overrides.
    pub fn build(files: &[&Path], cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        // Layer 1: Built-in defaults
        layers.push(JobDefaults::default().to_value());
        sources.push(ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        });

        // Layer 2: Settings files
        for path in files {
            let (value, digest) = load_settings_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        // Layer 3: CLI overrides
        if let Some(cli) = cli_overrides {
            validate_sections(&cli)?;
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);

        // Fail now rather than at first use
        JobDefaults::from_value(merged.clone())?;

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            settings: merged,
            sources,
        })
    }

    /// Typed defaults
    pub fn defaults(&self) -> Result<JobDefaults, ConfigError> {
        JobDefaults::from_value(self.settings.clone())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get a settings value by path (dot-separated)
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.settings;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Get a settings value as u64
    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }

    /// Get a settings value as string
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }
}

/// Load and parse a TOML settings file, returning the value and digest
pub fn load_settings_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path)
        .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

    // Compute digest
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());

    // Parse TOML
    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;

    let toml_value: toml::Value = toml::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

    let json_value = toml_to_json(toml_value);
    validate_sections(&json_value)?;

    Ok((json_value, digest))
}

/// Convert TOML Value to JSON Value
fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            Value::Object(map)
        }
    }
}

/// Only the known tables may appear at top level, and each must be a table
fn validate_sections(value: &Value) -> Result<(), ConfigError> {
    let map = value.as_object().ok_or_else(|| {
        ConfigError::ValidationError("settings must be a table".to_string())
    })?;
    for (key, section) in map {
        if !SECTIONS.contains(&key.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown section [{}], expected one of: {}",
                key,
                SECTIONS.join(", ")
            )));
        }
        if !section.is_object() {
            return Err(ConfigError::ValidationError(format!(
                "[{}] must be a table",
                key
            )));
        }
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown backend '{0}'")]
    UnknownBackend(String),

    #[error("Invalid attribute '{name}': {reason}")]
    InvalidAttribute { name: String, reason: String },

    #[error("Invalid template variable name '{0}'")]
    InvalidVariable(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
