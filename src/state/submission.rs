//! Submission record: the client-side view of one submitted job
//!
//! Status codes only ever move towards a finished state. A record that
//! has seen COMPLETED, CANCELLED or FAILED never contacts the scheduler
//! again. When a status query observes a change the record is written to
//! its cache file; when the new status is finished, the stored epilogue
//! runs first. A failing epilogue is reported after the new status has been
//! persisted, so retrying never runs it twice.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use clusterjob_backends::{BackendRegistry, ResourceMap, SchedulerBackend, StatusCode};

use crate::host::{CommandRunner, ExecError, RemoteHost};
use crate::poll::{wait_for, PollPolicy};

use super::cache::{CacheEntry, CacheError, CacheLocation, SCHEMA_ID, SCHEMA_VERSION};

/// Errors for submission records
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Cannot determine status of job {job_id}; scheduler said: {output}")]
    UndeterminableStatus { job_id: String, output: String },

    #[error("Epilogue failed: {output}")]
    Epilogue { output: String },

    #[error("Job has not finished (status {0})")]
    NotFinished(StatusCode),

    #[error("Unknown backend '{0}'")]
    UnknownBackend(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Everything a record is built from
pub struct SubmissionParts {
    pub backend: Arc<dyn SchedulerBackend>,
    pub runner: Arc<dyn CommandRunner>,
    pub remote: Option<RemoteHost>,
    pub resources: ResourceMap,
    pub policy: PollPolicy,
    pub job_id: String,
    pub status: StatusCode,
    pub epilogue: Option<String>,
    pub cache: Option<CacheLocation>,
}

/// A submitted job
pub struct SubmissionRecord {
    backend: Arc<dyn SchedulerBackend>,
    runner: Arc<dyn CommandRunner>,
    remote: Option<RemoteHost>,
    resources: ResourceMap,
    policy: PollPolicy,
    job_id: String,
    status: StatusCode,
    epilogue: Option<String>,
    cache: Option<CacheLocation>,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for SubmissionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionRecord")
            .field("backend", &self.backend.name())
            .field("remote", &self.remote)
            .field("job_id", &self.job_id)
            .field("status", &self.status)
            .field("cache", &self.cache)
            .finish()
    }
}

impl SubmissionRecord {
    pub fn from_parts(parts: SubmissionParts) -> Self {
        Self {
            backend: parts.backend,
            runner: parts.runner,
            remote: parts.remote,
            resources: parts.resources,
            policy: parts.policy,
            job_id: parts.job_id,
            status: parts.status,
            epilogue: parts.epilogue,
            cache: parts.cache,
            created_at: Utc::now(),
        }
    }

    /// Rebuild a record from a cache entry
    pub fn from_entry(
        entry: CacheEntry,
        location: Option<CacheLocation>,
        registry: &BackendRegistry,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, SubmissionError> {
        let backend = registry
            .get(&entry.backend)
            .ok_or_else(|| SubmissionError::UnknownBackend(entry.backend.clone()))?;
        let remote = entry
            .remote
            .map(|host| RemoteHost::new(host).with_clients(entry.ssh, entry.scp));
        Ok(Self {
            backend,
            runner,
            remote,
            resources: entry.resources,
            policy: PollPolicy::new(entry.sleep_interval),
            job_id: entry.job_id,
            status: entry.status,
            epilogue: entry.epilogue,
            cache: location,
            created_at: entry.created_at,
        })
    }

    /// Resume a record from its cache file
    pub fn load(
        cache_file: &Path,
        registry: &BackendRegistry,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, SubmissionError> {
        let entry = CacheEntry::from_file(cache_file)?;
        let location = CacheLocation {
            cache_id: entry.cache_id.clone(),
            path: cache_file.to_path_buf(),
        };
        debug!(path = %cache_file.display(), job_id = %entry.job_id, "loaded submission");
        Self::from_entry(entry, Some(location), registry, runner)
    }

    /// Snapshot for the cache store
    pub fn to_entry(&self) -> CacheEntry {
        let (ssh, scp) = match &self.remote {
            Some(remote) => (remote.ssh.clone(), remote.scp.clone()),
            None => ("ssh".to_string(), "scp".to_string()),
        };
        CacheEntry {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            cache_id: self
                .cache
                .as_ref()
                .map(|c| c.cache_id.clone())
                .unwrap_or_default(),
            backend: self.backend.name().to_string(),
            remote: self.remote.as_ref().map(|r| r.host.clone()),
            resources: self.resources.clone(),
            sleep_interval: self.policy.ceiling,
            job_id: self.job_id.clone(),
            status: self.status,
            epilogue: self.epilogue.clone(),
            ssh,
            scp,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn backend(&self) -> &dyn SchedulerBackend {
        self.backend.as_ref()
    }

    pub fn remote(&self) -> Option<&RemoteHost> {
        self.remote.as_ref()
    }

    /// Resources frozen at submission time
    pub fn resources(&self) -> &ResourceMap {
        &self.resources
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.policy
    }

    pub fn epilogue(&self) -> Option<&str> {
        self.epilogue.as_deref()
    }

    pub fn cache_file(&self) -> Option<&PathBuf> {
        self.cache.as_ref().map(|c| &c.path)
    }

    /// The memoized status, without asking the scheduler
    pub fn last_status(&self) -> StatusCode {
        self.status
    }

    /// Current status, asking the scheduler unless the job has finished
    pub fn status(&mut self) -> Result<StatusCode, SubmissionError> {
        if self.status.is_finished() {
            return Ok(self.status);
        }

        let (observed, output) = self.query(false)?;
        let observed = match observed {
            Some(status) => status,
            None => match self.query(true)? {
                (Some(status), _) => status,
                (None, finished_output) => {
                    warn!(job_id = %self.job_id, "scheduler gave no recognizable status");
                    return Err(SubmissionError::UndeterminableStatus {
                        job_id: self.job_id.clone(),
                        output: format!("{}{}", output, finished_output),
                    });
                }
            },
        };

        if observed == self.status {
            return Ok(observed);
        }

        info!(job_id = %self.job_id, from = %self.status, to = %observed, "status changed");
        self.status = observed;

        let epilogue = if observed.is_finished() {
            self.run_epilogue()
        } else {
            Ok(())
        };
        self.dump()?;
        epilogue?;

        Ok(observed)
    }

    fn query(&self, finished: bool) -> Result<(Option<StatusCode>, String), SubmissionError> {
        let command = self.backend.status_command(&self.job_id, finished);
        let output = self.runner.run(&command, self.remote.as_ref(), "", "", true)?;
        Ok((self.backend.parse_status(&output, finished), output))
    }

    /// Whether the job has finished, after a status query
    pub fn ready(&mut self) -> Result<bool, SubmissionError> {
        Ok(self.status()?.is_finished())
    }

    /// Whether the job finished with COMPLETED; an error while it is
    /// still pending or running
    pub fn successful(&mut self) -> Result<bool, SubmissionError> {
        let status = self.status()?;
        if !status.is_finished() {
            return Err(SubmissionError::NotFinished(status));
        }
        Ok(status == StatusCode::Completed)
    }

    /// Poll with backoff until the job finishes or the time spent sleeping
    /// exceeds `timeout`
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<StatusCode, SubmissionError> {
        let runner = Arc::clone(&self.runner);
        let policy = self.policy;
        wait_for(&policy, timeout, || self.status(), |interval| runner.sleep(interval))
    }

    /// Status after waiting for the job to finish.
    ///
    /// Running out of `timeout` is not an error; the returned status is
    /// then not finished.
    pub fn get(&mut self, timeout: Option<Duration>) -> Result<StatusCode, SubmissionError> {
        let status = self.status()?;
        if status.is_finished() {
            return Ok(status);
        }
        self.wait(timeout)?;
        self.status()
    }

    /// Ask the scheduler to cancel the job and record CANCELLED.
    ///
    /// Does nothing for a finished job. The scheduler's answer is not
    /// checked; the local record is authoritative.
    pub fn cancel(&mut self) -> Result<(), SubmissionError> {
        if self.status.is_finished() {
            return Ok(());
        }
        let command = self.backend.cancel_command(&self.job_id);
        if let Err(e) = self.runner.run(&command, self.remote.as_ref(), "", "", true) {
            warn!(job_id = %self.job_id, error = %e, "cancel command failed");
        }
        info!(job_id = %self.job_id, "cancelled");
        self.status = StatusCode::Cancelled;
        self.dump()
    }

    /// Run the stored epilogue, if any, in the local working directory
    pub fn run_epilogue(&self) -> Result<(), SubmissionError> {
        let Some(script) = self.epilogue.as_deref() else {
            return Ok(());
        };
        match self.runner.run_script(script) {
            Ok(_) => {
                debug!(job_id = %self.job_id, "epilogue finished");
                Ok(())
            }
            Err(e) => {
                let output = e.output().map(str::to_string).unwrap_or_else(|| e.to_string());
                let cwd = std::env::current_dir()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                error!(job_id = %self.job_id, cwd = %cwd, script = %script, "epilogue failed: {}", output);
                Err(SubmissionError::Epilogue { output })
            }
        }
    }

    /// Write the record to its cache file, if it has one
    pub fn dump(&self) -> Result<(), SubmissionError> {
        if let Some(cache) = &self.cache {
            self.to_entry().write_to_file(&cache.path)?;
            debug!(path = %cache.path.display(), status = %self.status, "record written");
        }
        Ok(())
    }
}
