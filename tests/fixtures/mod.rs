//! Shared test harness
//!
//! A scratch directory (run folder plus cache folder), a mock cluster and
//! job environments wired to both.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use clusterjob::backends::BackendRegistry;
use clusterjob::config::JobDefaults;
use clusterjob::job::{JobEnvironment, JobSpec};
use clusterjob::mock::MockCluster;
use clusterjob::state::{CacheStore, SubmissionRecord};

/// Body of the classic printenv example job
pub const PRINTENV_BODY: &str = "\
echo \"Job id: $CLUSTERJOB_ID\"
echo \"Job name: $CLUSTERJOB_NAME\"
echo \"Submitted from: ${CLUSTERJOB_WORKDIR}\"
printenv
";

pub struct Harness {
    pub dir: TempDir,
    pub cluster: Arc<MockCluster>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            cluster: Arc::new(MockCluster::new()),
        }
    }

    pub fn run_dir(&self) -> PathBuf {
        self.dir.path().join("run")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    /// Built-in defaults with the run folder as rootdir and caching enabled
    pub fn defaults(&self) -> JobDefaults {
        let mut defaults = JobDefaults::default();
        defaults.attributes.rootdir = self.run_dir().to_string_lossy().to_string();
        defaults.attributes.cache_folder = Some(self.cache_dir().to_string_lossy().to_string());
        defaults
    }

    pub fn environment(&self) -> JobEnvironment {
        self.environment_with(self.defaults())
    }

    pub fn environment_with(&self, defaults: JobDefaults) -> JobEnvironment {
        JobEnvironment::new(defaults, BackendRegistry::builtin().unwrap(), self.cluster.clone())
            .unwrap()
    }

    pub fn job(&self, body: &str, name: &str) -> JobSpec {
        JobSpec::new(body, name, &self.environment()).unwrap()
    }

    pub fn store(&self) -> CacheStore {
        CacheStore::new(self.cache_dir(), "clusterjob").unwrap()
    }

    /// Load a cached record the way a fresh process would
    pub fn resume(&self, cache_id: &str) -> SubmissionRecord {
        let env = self.environment();
        let location = self.store().location(cache_id).unwrap();
        SubmissionRecord::load(&location.path, &env.registry, env.runner.clone()).unwrap()
    }
}

/// Resources of the printenv example
pub fn printenv_job(harness: &Harness) -> JobSpec {
    let mut job = harness.job(PRINTENV_BODY, "printenv");
    job.set_resource("queue", "test").unwrap();
    job.set_resource("time", "00:05:00").unwrap();
    job.set_resource("nodes", 1).unwrap();
    job.set_resource("threads", 1).unwrap();
    job.set_resource("mem", 100).unwrap();
    job.set_resource("stdout", "printenv.out").unwrap();
    job.set_resource("stderr", "printenv.err").unwrap();
    job
}
