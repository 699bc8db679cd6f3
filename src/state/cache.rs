//! Cache store for submission records
//!
//! One JSON file per submission, named `<prefix>.<cache_id>.cache` inside
//! the cache folder. A file holds everything needed to resume polling a job
//! without submitting it again. Files are replaced whole on every write.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use walkdir::WalkDir;

use clusterjob_backends::{ResourceMap, StatusCode};

/// Schema version for cache entries
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "clusterjob/submission@1";

/// File extension of cache entries
const EXTENSION: &str = "cache";

/// Process-wide counter for submissions without an explicit cache id
static CACHE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Next automatic cache id ("1", "2", ...)
pub fn next_cache_id() -> String {
    (CACHE_COUNTER.fetch_add(1, Ordering::SeqCst) + 1).to_string()
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported cache entry {path}: expected {expected}, found {found}")]
    SchemaMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Invalid cache name '{0}': only letters, digits, '_', '-' and '.' are allowed")]
    InvalidName(String),

    #[error("Invalid cache pattern: {0}")]
    Pattern(#[from] globset::Error),
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Durable snapshot of a submission record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    pub cache_id: String,

    /// Registered name of the backend the job was submitted with
    pub backend: String,

    /// Submission host, None for local submission
    pub remote: Option<String>,

    /// Resources as they were at submission time
    pub resources: ResourceMap,

    /// Poll ceiling in seconds
    pub sleep_interval: u64,

    /// Scheduler job id, empty when submission failed
    pub job_id: String,

    pub status: StatusCode,

    /// Rendered epilogue, run once on reaching a finished status
    pub epilogue: Option<String>,

    pub ssh: String,

    pub scp: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), CacheError> {
        let json = self.to_json().map_err(|source| CacheError::Json {
            path: path.display().to_string(),
            source,
        })?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json).map_err(|e| CacheError::io(&temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| CacheError::io(path, e))?;

        Ok(())
    }

    /// Load from file, checking the schema
    pub fn from_file(path: &Path) -> Result<Self, CacheError> {
        let json = fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;

        // Check the schema before the typed parse so an entry written by a
        // newer release gets a clear message
        let raw: serde_json::Value =
            serde_json::from_str(&json).map_err(|source| CacheError::Json {
                path: path.display().to_string(),
                source,
            })?;
        let found = raw
            .get("schema_id")
            .and_then(|v| v.as_str())
            .unwrap_or("<none>");
        if found != SCHEMA_ID {
            return Err(CacheError::SchemaMismatch {
                path: path.display().to_string(),
                expected: SCHEMA_ID.to_string(),
                found: found.to_string(),
            });
        }

        serde_json::from_value(raw).map_err(|source| CacheError::Json {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Where a record persists itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLocation {
    pub cache_id: String,
    pub path: PathBuf,
}

/// Folder of cache entries sharing one prefix
#[derive(Debug, Clone)]
pub struct CacheStore {
    folder: PathBuf,
    prefix: String,
}

impl CacheStore {
    pub fn new(folder: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let prefix = prefix.into();
        validate_name(&prefix)?;
        Ok(Self {
            folder: folder.into(),
            prefix,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path of the entry for `cache_id`
    pub fn location(&self, cache_id: &str) -> Result<CacheLocation, CacheError> {
        validate_name(cache_id)?;
        Ok(CacheLocation {
            cache_id: cache_id.to_string(),
            path: self
                .folder
                .join(format!("{}.{}.{}", self.prefix, cache_id, EXTENSION)),
        })
    }

    /// Create the cache folder if needed
    pub fn ensure_folder(&self) -> Result<(), CacheError> {
        fs::create_dir_all(&self.folder).map_err(|e| CacheError::io(&self.folder, e))
    }

    /// Entry for `cache_id`, None if there is none
    pub fn load(&self, cache_id: &str) -> Result<Option<CacheEntry>, CacheError> {
        let location = self.location(cache_id)?;
        if !location.path.is_file() {
            debug!(cache_id, "cache miss");
            return Ok(None);
        }
        debug!(cache_id, path = %location.path.display(), "cache hit");
        CacheEntry::from_file(&location.path).map(Some)
    }

    /// Write `entry` under its cache id
    pub fn store(&self, entry: &CacheEntry) -> Result<CacheLocation, CacheError> {
        self.ensure_folder()?;
        let location = self.location(&entry.cache_id)?;
        entry.write_to_file(&location.path)?;
        Ok(location)
    }

    /// Delete the entry for `cache_id`; returns whether one existed
    pub fn remove(&self, cache_id: &str) -> Result<bool, CacheError> {
        let location = self.location(cache_id)?;
        match fs::remove_file(&location.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&location.path, e)),
        }
    }

    /// Cache ids present in the folder, sorted
    pub fn list(&self) -> Result<Vec<String>, CacheError> {
        if !self.folder.is_dir() {
            return Ok(Vec::new());
        }
        let matcher = self.matcher()?;
        let head = format!("{}.", self.prefix);
        let tail = format!(".{}", EXTENSION);

        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.folder).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.folder).to_path_buf();
                CacheError::io(&path, io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !matcher.is_match(name.as_ref()) {
                continue;
            }
            if let Some(id) = name
                .strip_prefix(head.as_str())
                .and_then(|rest| rest.strip_suffix(tail.as_str()))
            {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Delete every entry of this prefix; returns how many were removed
    pub fn clear(&self) -> Result<usize, CacheError> {
        let ids = self.list()?;
        let mut removed = 0;
        for id in &ids {
            if self.remove(id)? {
                removed += 1;
            }
        }
        debug!(folder = %self.folder.display(), removed, "cache cleared");
        Ok(removed)
    }

    fn matcher(&self) -> Result<GlobMatcher, CacheError> {
        let pattern = format!("{}.*.{}", self.prefix, EXTENSION);
        Ok(Glob::new(&pattern)?.compile_matcher())
    }
}

/// Prefixes and ids end up in file names and glob patterns
fn validate_name(name: &str) -> Result<(), CacheError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidName(name.to_string()))
    }
}
