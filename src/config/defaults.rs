//! Built-in job defaults (layer 1) and per-job attribute overrides
//!
//! Every job attribute has a process-wide default. A `JobSpec` keeps its
//! own overrides separately and resolves the two into a flat
//! `JobAttributes` value on demand.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use clusterjob_backends::{BackendRegistry, ResourceMap};

use super::effective::ConfigError;

/// Names accepted in the `[attributes]` table of a settings file
pub const ATTRIBUTE_NAMES: &[&str] = &[
    "backend",
    "shell",
    "remote",
    "rootdir",
    "workdir",
    "filename",
    "prologue",
    "epilogue",
    "sleep_interval",
    "max_sleep_interval",
    "min_sleep_interval",
    "ssh",
    "scp",
    "cache_folder",
    "cache_prefix",
];

/// Execution attributes of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobAttributes {
    /// Registered backend name (default: "slurm")
    pub backend: String,

    /// Interpreter for rendered scripts (default: "/bin/bash")
    pub shell: String,

    /// Host to submit on via ssh; None submits locally
    pub remote: Option<String>,

    /// Root directory on the target host
    pub rootdir: String,

    /// Working directory, relative to rootdir
    pub workdir: String,

    /// Script filename; None derives `<jobname>.<extension>`
    pub filename: Option<String>,

    /// Local script run before a fresh submission
    pub prologue: String,

    /// Local script run once when the job reaches a terminal status
    pub epilogue: String,

    /// Explicit poll ceiling in seconds
    pub sleep_interval: Option<u64>,

    /// Upper bound for the poll ceiling (default: 1800)
    pub max_sleep_interval: u64,

    /// Lower bound for a derived poll ceiling (default: 10)
    pub min_sleep_interval: u64,

    pub ssh: String,

    pub scp: String,

    /// Folder for cache files; None disables caching
    pub cache_folder: Option<String>,

    /// Prefix of cache file names (default: "clusterjob")
    pub cache_prefix: String,
}

impl Default for JobAttributes {
    fn default() -> Self {
        Self {
            backend: "slurm".to_string(),
            shell: "/bin/bash".to_string(),
            remote: None,
            rootdir: String::new(),
            workdir: String::new(),
            filename: None,
            prologue: String::new(),
            epilogue: String::new(),
            sleep_interval: None,
            max_sleep_interval: 1800,
            min_sleep_interval: 10,
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
            cache_folder: None,
            cache_prefix: "clusterjob".to_string(),
        }
    }
}

/// Trim surrounding whitespace and trailing separators from a directory
/// attribute. A bare `/` stays as it is.
pub fn normalize_dir(path: &str) -> String {
    let trimmed = path.trim();
    let stripped = trimmed.trim_end_matches('/');
    if stripped.is_empty() && !trimmed.is_empty() {
        "/".to_string()
    } else {
        stripped.to_string()
    }
}

impl JobAttributes {
    /// Normalize `rootdir` and `workdir` in place
    pub fn normalize_dirs(&mut self) {
        self.rootdir = normalize_dir(&self.rootdir);
        self.workdir = normalize_dir(&self.workdir);
    }

    /// String value of an attribute for template substitution.
    ///
    /// Unset optional attributes do not resolve.
    pub fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "backend" => Some(self.backend.clone()),
            "shell" => Some(self.shell.clone()),
            "remote" => self.remote.clone(),
            "rootdir" => Some(self.rootdir.clone()),
            "workdir" => Some(self.workdir.clone()),
            "filename" => self.filename.clone(),
            "prologue" => Some(self.prologue.clone()),
            "epilogue" => Some(self.epilogue.clone()),
            "sleep_interval" => self.sleep_interval.map(|s| s.to_string()),
            "max_sleep_interval" => Some(self.max_sleep_interval.to_string()),
            "min_sleep_interval" => Some(self.min_sleep_interval.to_string()),
            "ssh" => Some(self.ssh.clone()),
            "scp" => Some(self.scp.clone()),
            "cache_folder" => self.cache_folder.clone(),
            "cache_prefix" => Some(self.cache_prefix.clone()),
            "fulldir" => Some(self.fulldir()),
            _ => None,
        }
    }

    /// rootdir joined with workdir
    pub fn fulldir(&self) -> String {
        match (self.rootdir.is_empty(), self.workdir.is_empty()) {
            (_, true) => self.rootdir.clone(),
            (true, false) => self.workdir.clone(),
            (false, false) => format!("{}/{}", self.rootdir, self.workdir),
        }
    }
}

/// Per-job attribute overrides; `None` falls back to the default.
///
/// Optional attributes use a nested `Option` so that an override can
/// explicitly clear a default (e.g. submit locally although the defaults
/// name a remote host).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeOverrides {
    pub backend: Option<String>,
    pub shell: Option<String>,
    pub remote: Option<Option<String>>,
    pub rootdir: Option<String>,
    pub workdir: Option<String>,
    pub filename: Option<Option<String>>,
    pub prologue: Option<String>,
    pub epilogue: Option<String>,
    pub sleep_interval: Option<Option<u64>>,
    pub max_sleep_interval: Option<u64>,
    pub min_sleep_interval: Option<u64>,
    pub ssh: Option<String>,
    pub scp: Option<String>,
    pub cache_folder: Option<Option<String>>,
    pub cache_prefix: Option<String>,
}

impl AttributeOverrides {
    /// Overlay these overrides on `defaults`
    pub fn resolve(&self, defaults: &JobAttributes) -> JobAttributes {
        fn pick<T: Clone>(over: &Option<T>, default: &T) -> T {
            over.as_ref().unwrap_or(default).clone()
        }
        JobAttributes {
            backend: pick(&self.backend, &defaults.backend),
            shell: pick(&self.shell, &defaults.shell),
            remote: pick(&self.remote, &defaults.remote),
            rootdir: pick(&self.rootdir, &defaults.rootdir),
            workdir: pick(&self.workdir, &defaults.workdir),
            filename: pick(&self.filename, &defaults.filename),
            prologue: pick(&self.prologue, &defaults.prologue),
            epilogue: pick(&self.epilogue, &defaults.epilogue),
            sleep_interval: pick(&self.sleep_interval, &defaults.sleep_interval),
            max_sleep_interval: pick(&self.max_sleep_interval, &defaults.max_sleep_interval),
            min_sleep_interval: pick(&self.min_sleep_interval, &defaults.min_sleep_interval),
            ssh: pick(&self.ssh, &defaults.ssh),
            scp: pick(&self.scp, &defaults.scp),
            cache_folder: pick(&self.cache_folder, &defaults.cache_folder),
            cache_prefix: pick(&self.cache_prefix, &defaults.cache_prefix),
        }
    }

    /// Value of an overridden attribute, for the instance template tier
    pub fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "backend" => self.backend.clone(),
            "shell" => self.shell.clone(),
            "remote" => self.remote.clone().flatten(),
            "rootdir" => self.rootdir.clone(),
            "workdir" => self.workdir.clone(),
            "filename" => self.filename.clone().flatten(),
            "prologue" => self.prologue.clone(),
            "epilogue" => self.epilogue.clone(),
            "sleep_interval" => self.sleep_interval.flatten().map(|s| s.to_string()),
            "max_sleep_interval" => self.max_sleep_interval.map(|s| s.to_string()),
            "min_sleep_interval" => self.min_sleep_interval.map(|s| s.to_string()),
            "ssh" => self.ssh.clone(),
            "scp" => self.scp.clone(),
            "cache_folder" => self.cache_folder.clone().flatten(),
            "cache_prefix" => self.cache_prefix.clone(),
            _ => None,
        }
    }
}

/// Process-wide defaults: attributes, default resources and template variables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobDefaults {
    pub attributes: JobAttributes,
    pub resources: ResourceMap,
    pub variables: BTreeMap<String, String>,
}

impl JobDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "attributes": self.attributes,
            "resources": self.resources,
            "variables": self.variables,
        })
    }

    /// Typed view of a merged settings value
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let mut defaults: JobDefaults = serde_json::from_value(value)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        defaults.attributes.normalize_dirs();
        for (key, _) in defaults.resources.iter() {
            clusterjob_backends::validate_key(key)?;
        }
        for name in defaults.variables.keys() {
            validate_variable_name(name)?;
        }
        Ok(defaults)
    }

    /// Check values that need the backend registry
    pub fn validate(&self, registry: &BackendRegistry) -> Result<(), ConfigError> {
        if !registry.contains(&self.attributes.backend) {
            return Err(ConfigError::UnknownBackend(self.attributes.backend.clone()));
        }
        if self.attributes.min_sleep_interval > self.attributes.max_sleep_interval {
            return Err(ConfigError::ValidationError(format!(
                "min_sleep_interval ({}) exceeds max_sleep_interval ({})",
                self.attributes.min_sleep_interval, self.attributes.max_sleep_interval
            )));
        }
        Ok(())
    }
}

/// Template variable names follow the same rule as `{placeholder}` names
pub fn validate_variable_name(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidVariable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let attrs = JobAttributes::default();
        assert_eq!(attrs.backend, "slurm");
        assert_eq!(attrs.shell, "/bin/bash");
        assert_eq!(attrs.remote, None);
        assert_eq!(attrs.max_sleep_interval, 1800);
        assert_eq!(attrs.min_sleep_interval, 10);
        assert_eq!(attrs.cache_prefix, "clusterjob");
        assert!(attrs.cache_folder.is_none());
    }

    #[test]
    fn test_to_value() {
        let value = JobDefaults::default().to_value();
        assert_eq!(value["attributes"]["backend"], "slurm");
        assert_eq!(value["attributes"]["ssh"], "ssh");
        assert!(value["attributes"]["remote"].is_null());
        assert!(value["resources"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_value_round_trip() {
        let defaults = JobDefaults::default();
        let parsed = JobDefaults::from_value(defaults.to_value()).unwrap();
        assert_eq!(parsed, defaults);
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let value = serde_json::json!({"attributes": {"colour": "blue"}});
        let err = JobDefaults::from_value(value).unwrap_err();
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn test_overrides_resolve() {
        let defaults = JobAttributes {
            remote: Some("cluster".to_string()),
            ..JobAttributes::default()
        };
        let overrides = AttributeOverrides {
            shell: Some("/bin/zsh".to_string()),
            remote: Some(None),
            ..AttributeOverrides::default()
        };
        let resolved = overrides.resolve(&defaults);
        assert_eq!(resolved.shell, "/bin/zsh");
        assert_eq!(resolved.remote, None);
        assert_eq!(resolved.backend, "slurm");
        assert_eq!(overrides.lookup("shell").as_deref(), Some("/bin/zsh"));
        assert_eq!(overrides.lookup("backend"), None);
    }

    #[test]
    fn test_fulldir() {
        let mut attrs = JobAttributes::default();
        assert_eq!(attrs.fulldir(), "");
        attrs.rootdir = "/scratch".to_string();
        assert_eq!(attrs.fulldir(), "/scratch");
        attrs.workdir = "run1".to_string();
        assert_eq!(attrs.fulldir(), "/scratch/run1");
        assert_eq!(attrs.lookup("fulldir").as_deref(), Some("/scratch/run1"));
    }

    #[test]
    fn test_directories_normalized() {
        assert_eq!(normalize_dir(" /scratch/ "), "/scratch");
        assert_eq!(normalize_dir("run//"), "run");
        assert_eq!(normalize_dir("~/jobs"), "~/jobs");
        assert_eq!(normalize_dir("/"), "/");
        assert_eq!(normalize_dir("  "), "");

        let value = serde_json::json!({"attributes": {"rootdir": "/scratch/ ", "workdir": " run/"}});
        let defaults = JobDefaults::from_value(value).unwrap();
        assert_eq!(defaults.attributes.fulldir(), "/scratch/run");
    }

    #[test]
    fn test_validate_backend() {
        let registry = BackendRegistry::builtin().unwrap();
        let mut defaults = JobDefaults::default();
        assert!(defaults.validate(&registry).is_ok());
        defaults.attributes.backend = "condor".to_string();
        assert!(matches!(
            defaults.validate(&registry),
            Err(ConfigError::UnknownBackend(name)) if name == "condor"
        ));
    }

    #[test]
    fn test_variable_names() {
        assert!(validate_variable_name("input_file").is_ok());
        assert!(validate_variable_name("_x1").is_ok());
        assert!(validate_variable_name("1x").is_err());
        assert!(validate_variable_name("a-b").is_err());
        assert!(validate_variable_name("").is_err());
    }
}
