//! Scheduler backends for clusterjob.
//!
//! A backend knows one batch scheduler's dialect: how to turn generic
//! resource requirements into header directives, which commands submit,
//! query and cancel a job, and how to read the scheduler's answers back
//! into a [`StatusCode`]. Backends are stateless; the job lifecycle lives
//! in the `clusterjob` crate.

mod backend;
mod command;
mod conformance;
mod error;
mod lpbs;
mod lsf;
mod pbs;
mod pbspro;
mod registry;
mod resources;
mod sge;
mod slurm;
mod status;
mod time;

pub use backend::{rewrite_placeholders, JobVar, NativeVar, SchedulerBackend, COMMON_KEYS};
pub use command::{shell_quote, Command};
pub use conformance::{check_backend, canonical_resources};
pub use error::{BackendError, ConformanceError, RegistryError};
pub use lpbs::Lpbs;
pub use lsf::Lsf;
pub use pbs::Pbs;
pub use pbspro::PbsPro;
pub use registry::BackendRegistry;
pub use resources::{validate_key, ResourceMap, ResourceValue};
pub use sge::Sge;
pub use slurm::Slurm;
pub use status::{StatusCode, UnknownStatus};
pub use time::{ceil_minutes, format_dhms, format_hms, time_to_seconds, walltime_seconds};
