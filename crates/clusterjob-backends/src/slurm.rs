//! Slurm backend.

use regex_lite::Regex;

use crate::backend::{generic_option, JobVar, NativeVar, OptionStyle, SchedulerBackend};
use crate::command::Command;
use crate::error::BackendError;
use crate::resources::{ResourceMap, ResourceValue};
use crate::status::StatusCode;
use crate::time::{format_dhms, walltime_seconds};

/// Slurm (`sbatch`, `squeue`, `sacct`, `scancel`)
#[derive(Debug, Clone, Copy, Default)]
pub struct Slurm;

impl Slurm {
    fn translate(key: &str, value: &ResourceValue) -> Result<Option<String>, BackendError> {
        let option = match key {
            "jobname" => format!("--job-name={}", value),
            "queue" => format!("--partition={}", value),
            "time" => format!("--time={}", format_dhms(walltime_seconds(key, value)?)),
            "nodes" => format!("--nodes={}", value),
            "threads" => format!("--cpus-per-task={}", value),
            "mem" => format!("--mem={}", value),
            "stdout" => format!("--output={}", value),
            "stderr" => format!("--error={}", value),
            _ => return Ok(generic_option(OptionStyle::DoubleDash, key, value)),
        };
        Ok(Some(option))
    }
}

/// Map a Slurm state name to a status code
fn decode_state(state: &str) -> Option<StatusCode> {
    let state = state.trim().trim_end_matches('+');
    if state.starts_with("CANCELLED") {
        return Some(StatusCode::Cancelled);
    }
    match state {
        "PENDING" | "CONFIGURING" | "SUSPENDED" | "REQUEUED" | "RESIZING" => {
            Some(StatusCode::Pending)
        }
        "RUNNING" | "COMPLETING" => Some(StatusCode::Running),
        "COMPLETED" => Some(StatusCode::Completed),
        "FAILED" | "NODE_FAIL" | "PREEMPTED" | "TIMEOUT" | "OUT_OF_MEMORY" | "BOOT_FAIL"
        | "DEADLINE" => Some(StatusCode::Failed),
        _ => None,
    }
}

impl SchedulerBackend for Slurm {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn extension(&self) -> &'static str {
        "slr"
    }

    fn prefix(&self) -> &'static str {
        "#SBATCH"
    }

    fn submit_command(&self, script: &str) -> Command {
        Command::argv(["sbatch", script])
    }

    fn parse_job_id(&self, output: &str) -> Option<String> {
        let re = Regex::new(r"Submitted batch job (\d+)").ok()?;
        output
            .lines()
            .rev()
            .find_map(|line| re.captures(line.trim_end()))
            .map(|caps| caps[1].to_string())
    }

    fn status_command(&self, job_id: &str, finished: bool) -> Command {
        if finished {
            Command::argv(["sacct", "--format=state", "-n", "-j", job_id])
        } else {
            Command::argv(["squeue", "-h", "-o", "%T", "-j", job_id])
        }
    }

    fn parse_status(&self, output: &str, _finished: bool) -> Option<StatusCode> {
        // sacct lists one line per job step; the first is the allocation.
        output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(decode_state)
    }

    fn cancel_command(&self, job_id: &str) -> Command {
        Command::argv(["scancel", job_id])
    }

    fn resource_header_lines(&self, resources: &ResourceMap) -> Result<Vec<String>, BackendError> {
        let mut lines = Vec::new();
        for (key, value) in resources.iter() {
            lines.extend(Self::translate(key, value)?);
        }
        Ok(lines)
    }

    fn native_var(&self, var: JobVar) -> NativeVar {
        NativeVar::Env(match var {
            JobVar::JobId => "SLURM_JOB_ID",
            JobVar::WorkDir => "SLURM_SUBMIT_DIR",
            JobVar::SubmitHost => "SLURM_SUBMIT_HOST",
            JobVar::JobName => "SLURM_JOB_NAME",
            JobVar::ArrayIndex => "SLURM_ARRAY_TASK_ID",
            JobVar::NodeList => "SLURM_JOB_NODELIST",
        })
    }
}
