//! Settings layering
//!
//! Job defaults are merged from three kinds of layer:
//! 1. Built-in defaults
//! 2. Settings files (TOML with [attributes], [resources], [variables])
//! 3. CLI overrides
//!
//! Per-job overrides are kept apart from the defaults (see `JobSpec`).

mod defaults;
mod effective;
mod merge;

pub use defaults::{
    normalize_dir, validate_variable_name, AttributeOverrides, JobAttributes, JobDefaults,
    ATTRIBUTE_NAMES,
};
pub use effective::{load_settings_file, ConfigError, ConfigOrigin, ConfigSource, EffectiveSettings};
pub use merge::{deep_merge, merge_layers};
