//! Mock cluster
//!
//! An in-process stand-in for a Slurm login node, used as the
//! `CommandRunner` of jobs and submission records in tests.
//!
//! # Commands understood
//!
//! - `sbatch <script>`: hands out increasing job ids
//! - `squeue ... -j <id>`: the job's state while it is queued or running
//! - `sacct ... -j <id>`: the job's state, including finished states
//! - `scancel <id>`: moves the job to CANCELLED
//!
//! Every other command succeeds silently. Each job walks through a
//! configurable progression of states, one step per `squeue` query.

mod cluster;
mod failure;
mod state;

pub use cluster::MockCluster;
pub use failure::{FailureConfig, FailureInjector, MockOp};
pub use state::{ClusterState, Invocation, MockJob, Upload, DEFAULT_PROGRESSION};
