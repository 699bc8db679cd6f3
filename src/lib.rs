//! clusterjob - submit, track and resume HPC batch jobs
//!
//! A [`JobSpec`] is a job script template plus resources and attributes.
//! Submitting it renders the script for the selected scheduler backend,
//! copies it to the target host and hands it to the scheduler; the
//! returned [`SubmissionRecord`] tracks the job, polls with exponential
//! backoff, runs the epilogue exactly once and persists itself to a
//! [`CacheStore`] so a later process can resume it.
//!
//! Scheduler dialects live in the `clusterjob-backends` crate, re-exported
//! here as [`backends`].

pub mod config;
pub mod conformance;
pub mod host;
pub mod job;
pub mod mock;
pub mod poll;
pub mod render;
pub mod state;

pub use clusterjob_backends as backends;

pub use clusterjob_backends::{BackendRegistry, ResourceMap, ResourceValue, SchedulerBackend, StatusCode};
pub use config::{ConfigError, EffectiveSettings, JobAttributes, JobDefaults};
pub use conformance::{ConformanceReport, ConformanceRunner};
pub use host::{CommandRunner, ExecError, RemoteHost, ShellRunner};
pub use job::{JobEnvironment, JobError, JobSpec, SubmitOptions};
pub use poll::PollPolicy;
pub use render::{RenderError, ScriptRenderer};
pub use state::{CacheError, CacheStore, SubmissionError, SubmissionRecord};
