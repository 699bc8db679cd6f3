//! LSF backend.

use regex_lite::Regex;

use crate::backend::{column_index, generic_option, JobVar, NativeVar, OptionStyle, SchedulerBackend};
use crate::command::{shell_quote, Command};
use crate::error::BackendError;
use crate::pbs::count;
use crate::resources::{ResourceMap, ResourceValue};
use crate::status::StatusCode;
use crate::time::{ceil_minutes, walltime_seconds};

/// IBM Spectrum LSF (`bsub`, `bjobs`, `bkill`)
#[derive(Debug, Clone, Copy, Default)]
pub struct Lsf;

impl Lsf {
    fn translate(key: &str, value: &ResourceValue) -> Result<Option<String>, BackendError> {
        let option = match key {
            "jobname" => format!("-J {}", value),
            "queue" => format!("-q {}", value),
            "time" => format!("-W {}", ceil_minutes(walltime_seconds(key, value)?)),
            "mem" => format!("-M {}", value),
            "stdout" => format!("-o {}", value),
            "stderr" => format!("-e {}", value),
            _ => return Ok(generic_option(OptionStyle::SingleDash, key, value)),
        };
        Ok(Some(option))
    }
}

fn decode_stat(stat: &str) -> Option<StatusCode> {
    match stat {
        "PEND" | "PSUSP" | "USUSP" | "SSUSP" | "UNKWN" | "WAIT" | "PROV" => Some(StatusCode::Pending),
        "RUN" => Some(StatusCode::Running),
        "DONE" => Some(StatusCode::Completed),
        "EXIT" | "ZOMBI" => Some(StatusCode::Failed),
        _ => None,
    }
}

impl SchedulerBackend for Lsf {
    fn name(&self) -> &'static str {
        "lsf"
    }

    fn extension(&self) -> &'static str {
        "lsf"
    }

    fn prefix(&self) -> &'static str {
        "#BSUB"
    }

    fn submit_command(&self, script: &str) -> Command {
        // bsub only reads #BSUB directives from stdin
        Command::shell(format!("bsub < {}", shell_quote(script)))
    }

    fn parse_job_id(&self, output: &str) -> Option<String> {
        let re = Regex::new(r"Job <([^>]+)> is submitted").ok()?;
        re.captures(output).map(|caps| caps[1].to_string())
    }

    fn status_command(&self, job_id: &str, _finished: bool) -> Command {
        Command::argv(["bjobs", "-a", job_id])
    }

    fn parse_status(&self, output: &str, _finished: bool) -> Option<StatusCode> {
        let mut lines = output.lines().filter(|l| !l.trim().is_empty());
        let header = lines.find(|l| l.trim_start().starts_with("JOBID"))?;
        let stat_col = column_index(header, "STAT")?;
        lines
            .filter_map(|row| row.split_whitespace().nth(stat_col))
            .find_map(decode_stat)
    }

    fn cancel_command(&self, job_id: &str) -> Command {
        Command::argv(["bkill", job_id])
    }

    fn resource_header_lines(&self, resources: &ResourceMap) -> Result<Vec<String>, BackendError> {
        let mut lines = Vec::new();
        let nodes = count(resources, "nodes")?;
        let threads = count(resources, "threads")?;
        if nodes.is_some() || threads.is_some() {
            let slots = nodes
                .unwrap_or(1)
                .checked_mul(threads.unwrap_or(1))
                .ok_or_else(|| BackendError::InvalidResource {
                    key: "threads".to_string(),
                    reason: "nodes times threads does not fit a slot count".to_string(),
                })?;
            lines.push(format!("-n {}", slots));
        }
        for (key, value) in resources.iter() {
            if matches!(key, "nodes" | "threads") {
                continue;
            }
            lines.extend(Self::translate(key, value)?);
        }
        Ok(lines)
    }

    fn native_var(&self, var: JobVar) -> NativeVar {
        match var {
            JobVar::JobId => NativeVar::Env("LSB_JOBID"),
            JobVar::WorkDir => NativeVar::Env("LS_SUBCWD"),
            JobVar::SubmitHost => NativeVar::Env("LSB_SUB_HOST"),
            JobVar::JobName => NativeVar::Env("LSB_JOBNAME"),
            JobVar::ArrayIndex => NativeVar::Env("LSB_JOBINDEX"),
            JobVar::NodeList => NativeVar::Env("LSB_HOSTS"),
        }
    }
}
