//! Mock cluster state
//!
//! Jobs, and a log of everything the cluster was asked to do.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// States a job walks through when no progression is given
pub const DEFAULT_PROGRESSION: &[&str] = &["PENDING", "RUNNING", "COMPLETED"];

/// First job id handed out by `sbatch`
const FIRST_JOB_ID: u64 = 1000;

/// Whether `squeue` still lists a job in this state
pub fn is_queued_state(state: &str) -> bool {
    matches!(
        state,
        "PENDING" | "CONFIGURING" | "SUSPENDED" | "REQUEUED" | "RUNNING" | "COMPLETING"
    )
}

/// A job known to the mock scheduler
#[derive(Debug, Clone)]
pub struct MockJob {
    pub job_id: String,
    /// Slurm state names, in order
    pub states: Vec<String>,
    /// Index of the current state
    pub position: usize,
    /// Script path given to `sbatch`
    pub script: Option<String>,
}

impl MockJob {
    pub fn new(job_id: String, states: &[&str]) -> Self {
        let states = if states.is_empty() {
            DEFAULT_PROGRESSION
        } else {
            states
        };
        Self {
            job_id,
            states: states.iter().map(|s| s.to_string()).collect(),
            position: 0,
            script: None,
        }
    }

    pub fn current(&self) -> &str {
        &self.states[self.position]
    }

    /// Move to the next state; the last one sticks
    pub fn advance(&mut self) {
        if self.position + 1 < self.states.len() {
            self.position += 1;
        }
    }

    pub fn cancel(&mut self) {
        self.states = vec!["CANCELLED".to_string()];
        self.position = 0;
    }
}

/// A command the cluster was asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    /// Host for ssh invocations
    pub remote: Option<String>,
    /// Directory the command ran in
    pub dir: String,
}

/// A file copied to a remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub local: PathBuf,
    pub host: String,
    pub remote_path: String,
    /// File contents at the time of the copy
    pub contents: String,
}

/// Mutable state of the mock cluster
#[derive(Debug)]
pub struct ClusterState {
    next_job_id: u64,
    pub jobs: BTreeMap<String, MockJob>,
    /// Progression for jobs created by `sbatch`
    pub progression: Vec<String>,
    pub invocations: Vec<Invocation>,
    pub submitted_scripts: Vec<String>,
    pub status_queries: usize,
    pub cancelled: Vec<String>,
    pub scripts_run: Vec<String>,
    pub uploads: Vec<Upload>,
    pub sleeps: Vec<Duration>,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            next_job_id: FIRST_JOB_ID,
            jobs: BTreeMap::new(),
            progression: DEFAULT_PROGRESSION.iter().map(|s| s.to_string()).collect(),
            invocations: Vec::new(),
            submitted_scripts: Vec::new(),
            status_queries: 0,
            cancelled: Vec::new(),
            scripts_run: Vec::new(),
            uploads: Vec::new(),
            sleeps: Vec::new(),
        }
    }
}

impl ClusterState {
    /// Register a job with the given progression and return its id
    pub fn add_job(&mut self, states: &[&str]) -> String {
        let job_id = self.next_job_id.to_string();
        self.next_job_id += 1;
        self.jobs
            .insert(job_id.clone(), MockJob::new(job_id.clone(), states));
        job_id
    }

    /// Accept a script from `sbatch`
    pub fn submit(&mut self, script: &str) -> String {
        let progression = self.progression.clone();
        let states: Vec<&str> = progression.iter().map(String::as_str).collect();
        let job_id = self.add_job(&states);
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.script = Some(script.to_string());
        }
        self.submitted_scripts.push(script.to_string());
        job_id
    }

    /// `squeue` answer: the state while queued, then nothing
    pub fn squeue(&mut self, job_id: &str) -> Option<String> {
        self.status_queries += 1;
        let job = self.jobs.get_mut(job_id)?;
        let state = job.current().to_string();
        if is_queued_state(&state) {
            job.advance();
            Some(state)
        } else {
            None
        }
    }

    /// `sacct` answer: the current state of any known job
    pub fn sacct(&mut self, job_id: &str) -> Option<String> {
        self.status_queries += 1;
        self.jobs.get(job_id).map(|job| job.current().to_string())
    }

    pub fn cancel(&mut self, job_id: &str) -> bool {
        self.cancelled.push(job_id.to_string());
        match self.jobs.get_mut(job_id) {
            Some(job) => {
                job.cancel();
                true
            }
            None => false,
        }
    }
}
