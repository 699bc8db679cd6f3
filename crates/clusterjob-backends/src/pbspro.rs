//! PBS Pro backend.

use crate::backend::{JobVar, NativeVar, SchedulerBackend};
use crate::command::Command;
use crate::error::BackendError;
use crate::pbs::{count, parse_qstat, parse_qsub_id, pbs_defaults, pbs_native_var, translate_pbs};
use crate::resources::ResourceMap;
use crate::status::StatusCode;

/// PBS Pro: the PBS dialect with `select` chunk requests and `qstat -x`
#[derive(Debug, Clone, Copy, Default)]
pub struct PbsPro;

impl SchedulerBackend for PbsPro {
    fn name(&self) -> &'static str {
        "pbspro"
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
        Command::argv(["qstat", "-x", job_id])
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
        let ppn = count(resources, "ppn")?;
        let threads = count(resources, "threads")?;
        if nodes.is_some() || ppn.is_some() || threads.is_some() {
            let (nodes, ppn, threads) = (nodes.unwrap_or(1), ppn.unwrap_or(1), threads.unwrap_or(1));
            let ncpus = ppn.checked_mul(threads).ok_or_else(|| BackendError::InvalidResource {
                key: "threads".to_string(),
                reason: "ppn times threads does not fit a cpu count".to_string(),
            })?;
            lines.push(format!(
                "-l select={}:ncpus={}:mpiprocs={}:ompthreads={}",
                nodes, ncpus, ppn, threads
            ));
        }
        for (key, value) in resources.iter() {
            if matches!(key, "nodes" | "ppn" | "threads") {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_line() {
        let res = ResourceMap::new()
            .with("nodes", 2).unwrap()
            .with("ppn", 4).unwrap()
            .with("threads", 2).unwrap()
            .with("jobname", "hybrid").unwrap();
        assert_eq!(
            PbsPro.resource_header_lines(&res).unwrap(),
            vec!["-l select=2:ncpus=8:mpiprocs=4:ompthreads=2", "-N hybrid"]
        );
    }

    #[test]
    fn test_threads_only() {
        let res = ResourceMap::new().with("threads", 16).unwrap();
        assert_eq!(
            PbsPro.resource_header_lines(&res).unwrap(),
            vec!["-l select=1:ncpus=16:mpiprocs=1:ompthreads=16"]
        );
    }

    #[test]
    fn test_cpu_count_overflow() {
        let res = ResourceMap::new()
            .with("ppn", i64::MAX).unwrap()
            .with("threads", 2).unwrap();
        assert!(matches!(
            PbsPro.resource_header_lines(&res),
            Err(BackendError::InvalidResource { .. })
        ));
    }

    #[test]
    fn test_finished_jobs_visible() {
        assert_eq!(PbsPro.status_command("9", true).to_string(), "qstat -x 9");
        let out = "Job id  Name  User  Time Use S Queue\n9.srv  job  me  00:10:00 F workq\n";
        assert_eq!(PbsPro.parse_status(out, true), Some(StatusCode::Completed));
    }
}
