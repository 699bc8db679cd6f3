//! PBS/Torque backend.

use regex_lite::Regex;

use crate::backend::{generic_option, JobVar, NativeVar, OptionStyle, SchedulerBackend};
use crate::command::Command;
use crate::error::BackendError;
use crate::resources::{ResourceMap, ResourceValue};
use crate::status::StatusCode;
use crate::time::{format_hms, walltime_seconds};

/// PBS/Torque (`qsub`, `qstat`, `qdel`)
#[derive(Debug, Clone, Copy, Default)]
pub struct Pbs;

/// Positive integer value of a count resource such as `nodes`
pub(crate) fn count(resources: &ResourceMap, key: &str) -> Result<Option<u64>, BackendError> {
    match resources.get(key) {
        None => Ok(None),
        Some(value) => match value.as_u64() {
            Some(n) if n > 0 => Ok(Some(n)),
            _ => Err(BackendError::InvalidResource {
                key: key.to_string(),
                reason: format!("expected a positive integer, got '{}'", value),
            }),
        },
    }
}

/// Options shared by the PBS dialects, for everything except node requests
pub(crate) fn translate_pbs(key: &str, value: &ResourceValue) -> Result<Option<String>, BackendError> {
    let option = match key {
        "jobname" => format!("-N {}", value),
        "queue" => format!("-q {}", value),
        "time" => format!("-l walltime={}", format_hms(walltime_seconds(key, value)?)),
        "mem" if value.is_plain_number() => format!("-l mem={}m", value),
        "mem" => format!("-l mem={}", value),
        "stdout" => format!("-o {}", value),
        "stderr" => format!("-e {}", value),
        _ => return Ok(generic_option(OptionStyle::ResourceList, key, value)),
    };
    Ok(Some(option))
}

/// Job id from `qsub`: the numeric part of `<digits>.<server>` on the last line
pub(crate) fn parse_qsub_id(output: &str) -> Option<String> {
    let re = Regex::new(r"^(\d+)\.[\w.-]+$").ok()?;
    let last = output.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    re.captures(last).map(|caps| caps[1].to_string())
}

/// Decode `qstat` output: the state is the fifth column of the last row
pub(crate) fn parse_qstat(output: &str) -> Option<StatusCode> {
    let last = output.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    if last.starts_with("qstat: Unknown Job") {
        return Some(StatusCode::Completed);
    }
    match last.split_whitespace().nth(4)? {
        "C" | "F" | "X" => Some(StatusCode::Completed),
        "E" | "R" | "B" => Some(StatusCode::Running),
        "H" | "Q" | "T" | "W" | "S" | "M" | "U" => Some(StatusCode::Pending),
        _ => None,
    }
}

pub(crate) fn pbs_native_var(var: JobVar) -> NativeVar {
    match var {
        JobVar::JobId => NativeVar::Env("PBS_JOBID"),
        JobVar::WorkDir => NativeVar::Env("PBS_O_WORKDIR"),
        JobVar::SubmitHost => NativeVar::Env("PBS_O_HOST"),
        JobVar::JobName => NativeVar::Env("PBS_JOBNAME"),
        JobVar::ArrayIndex => NativeVar::Env("PBS_ARRAYID"),
        JobVar::NodeList => NativeVar::Shell("`cat $PBS_NODEFILE`"),
    }
}

pub(crate) fn pbs_defaults() -> ResourceMap {
    let mut defaults = ResourceMap::new();
    // export the submission environment, join stdout and stderr
    defaults.insert_static("V", true);
    defaults.insert_static("j", "oe");
    defaults
}

impl SchedulerBackend for Pbs {
    fn name(&self) -> &'static str {
        "pbs"
    }

    fn extension(&self) -> &'static str {
        "pbs"
    }

    fn prefix(&self) -> &'static str {
        "#PBS"
    }

    fn default_resources(&self) -> ResourceMap {
        pbs_defaults()
    }

    fn submit_command(&self, script: &str) -> Command {
        Command::argv(["qsub", script])
    }

    fn parse_job_id(&self, output: &str) -> Option<String> {
        parse_qsub_id(output)
    }

    fn status_command(&self, job_id: &str, _finished: bool) -> Command {
        Command::argv(["qstat", job_id])
    }

    fn parse_status(&self, output: &str, _finished: bool) -> Option<StatusCode> {
        parse_qstat(output)
    }

    fn cancel_command(&self, job_id: &str) -> Command {
        Command::argv(["qdel", job_id])
    }

    fn resource_header_lines(&self, resources: &ResourceMap) -> Result<Vec<String>, BackendError> {
        let mut lines = Vec::new();
        let nodes = count(resources, "nodes")?;
        let threads = count(resources, "threads")?;
        match (nodes, threads) {
            (Some(n), Some(t)) => lines.push(format!("-l nodes={}:ppn={}", n, t)),
            (Some(n), None) => lines.push(format!("-l nodes={}", n)),
            (None, Some(t)) => lines.push(format!("-l nodes=1:ppn={}", t)),
            (None, None) => {}
        }
        for (key, value) in resources.iter() {
            if matches!(key, "nodes" | "threads") {
                continue;
            }
            lines.extend(translate_pbs(key, value)?);
        }
        Ok(lines)
    }

    fn native_var(&self, var: JobVar) -> NativeVar {
        pbs_native_var(var)
    }
}
