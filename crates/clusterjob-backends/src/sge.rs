//! Sun/Univa Grid Engine backend.

use regex_lite::Regex;

use crate::backend::{generic_option, JobVar, NativeVar, OptionStyle, SchedulerBackend};
use crate::command::Command;
use crate::error::BackendError;
use crate::resources::{ResourceMap, ResourceValue};
use crate::status::StatusCode;
use crate::time::{format_hms, walltime_seconds};

/// Grid Engine (`qsub`, `qstat -j`, `qdel`)
///
/// Node and thread counts need a site-specific parallel environment
/// (`-pe <name> <slots>`), so `nodes` and `threads` produce no header;
/// pass `pe` explicitly instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sge;

impl Sge {
    fn translate(key: &str, value: &ResourceValue) -> Result<Option<String>, BackendError> {
        let option = match key {
            "jobname" => format!("-N {}", value),
            "nodes" | "threads" => return Ok(None),
            "queue" => format!("-q {}", value),
            "time" => format!("-l h_rt={}", format_hms(walltime_seconds(key, value)?)),
            "mem" if value.is_plain_number() => format!("-l h_vmem={}M", value),
            "mem" => format!("-l h_vmem={}", value),
            "stdout" => format!("-o {}", value),
            "stderr" => format!("-e {}", value),
            "pe" => format!("-pe {}", value),
            _ => return Ok(generic_option(OptionStyle::ResourceList, key, value)),
        };
        Ok(Some(option))
    }
}

impl SchedulerBackend for Sge {
    fn name(&self) -> &'static str {
        "sge"
    }

    fn extension(&self) -> &'static str {
        "sge"
    }

    fn prefix(&self) -> &'static str {
        "#$"
    }

    fn default_resources(&self) -> ResourceMap {
        let mut defaults = ResourceMap::new();
        defaults.insert_static("V", true);
        defaults.insert_static("cwd", true);
        defaults.insert_static("j", "y");
        defaults
    }

    fn submit_command(&self, script: &str) -> Command {
        Command::argv(["qsub", script])
    }

    fn parse_job_id(&self, output: &str) -> Option<String> {
        let re = Regex::new(r"^Your job (\d+) .* has been submitted$").ok()?;
        let last = output.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
        re.captures(last).map(|caps| caps[1].to_string())
    }

    fn status_command(&self, job_id: &str, _finished: bool) -> Command {
        Command::argv(["qstat", "-j", job_id])
    }

    /// `qstat -j` reports no state, only whether the job is still known.
    fn parse_status(&self, output: &str, _finished: bool) -> Option<StatusCode> {
        if output.contains("Following jobs do not exist") {
            Some(StatusCode::Completed)
        } else if output.trim().is_empty() {
            None
        } else {
            Some(StatusCode::Running)
        }
    }

    fn cancel_command(&self, job_id: &str) -> Command {
        Command::argv(["qdel", job_id])
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
            JobVar::JobId => "JOB_ID",
            JobVar::WorkDir => "SGE_O_WORKDIR",
            JobVar::SubmitHost => "SGE_O_HOST",
            JobVar::JobName => "JOB_NAME",
            JobVar::ArrayIndex => "SGE_TASK_ID",
            JobVar::NodeList => "HOSTNAME",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lines() {
        let mut res = Sge.default_resources();
        res.insert("jobname", "a").unwrap();
        res.insert("nodes", 4).unwrap();
        res.insert("threads", 2).unwrap();
        res.insert("time", "1-0").unwrap();
        res.insert("mem", 512).unwrap();
        res.insert("pe", "omp 8").unwrap();
        assert_eq!(
            Sge.resource_header_lines(&res).unwrap(),
            vec![
                "-V",
                "-cwd",
                "-j y",
                "-N a",
                "-l h_vmem=512M",
                "-pe omp 8",
                "-l h_rt=24:00:00",
            ]
        );
    }

    #[test]
    fn test_parse_job_id() {
        let out = "Your job 3141 (\"printenv\") has been submitted\n";
        assert_eq!(Sge.parse_job_id(out).as_deref(), Some("3141"));
        assert_eq!(Sge.parse_job_id("Unable to run job: denied\n"), None);
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(
            Sge.parse_status("Following jobs do not exist:\n3141\n", false),
            Some(StatusCode::Completed)
        );
        assert_eq!(
            Sge.parse_status("job_number: 3141\nowner: me\n", false),
            Some(StatusCode::Running)
        );
        assert_eq!(Sge.parse_status("\n", false), None);
    }
}
