//! LPBS backend.

use crate::backend::{JobVar, NativeVar, SchedulerBackend};
use crate::command::Command;
use crate::error::BackendError;
use crate::pbs::Pbs;
use crate::resources::ResourceMap;
use crate::status::StatusCode;

/// Local PBS emulation (`lqsub`, `lqstat`, `lqdel`) speaking the PBS dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct Lpbs;

impl SchedulerBackend for Lpbs {
    fn name(&self) -> &'static str {
        "lpbs"
    }

    fn extension(&self) -> &'static str {
        Pbs.extension()
    }

    fn prefix(&self) -> &'static str {
        Pbs.prefix()
    }

    fn default_resources(&self) -> ResourceMap {
        Pbs.default_resources()
    }

    fn submit_command(&self, script: &str) -> Command {
        Command::argv(["lqsub", script])
    }

    fn parse_job_id(&self, output: &str) -> Option<String> {
        Pbs.parse_job_id(output)
    }

    fn status_command(&self, job_id: &str, _finished: bool) -> Command {
        Command::argv(["lqstat", job_id])
    }

    fn parse_status(&self, output: &str, finished: bool) -> Option<StatusCode> {
        Pbs.parse_status(output, finished)
    }

    fn cancel_command(&self, job_id: &str) -> Command {
        Command::argv(["lqdel", job_id])
    }

    fn resource_header_lines(&self, resources: &ResourceMap) -> Result<Vec<String>, BackendError> {
        Pbs.resource_header_lines(resources)
    }

    fn native_var(&self, var: JobVar) -> NativeVar {
        Pbs.native_var(var)
    }
}
