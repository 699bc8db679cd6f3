//! In-process Slurm-like cluster implementing `CommandRunner`

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clusterjob_backends::Command;

use crate::host::{join_dir, CommandRunner, ExecError, RemoteHost};

use super::failure::{FailureConfig, FailureInjector, MockOp};
use super::state::{ClusterState, Invocation, Upload};

/// Fake cluster answering the Slurm command dialect
///
/// Nothing is executed and nothing sleeps. Directory commands succeed
/// without touching the file system.
#[derive(Default)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
    failures: Arc<Mutex<FailureInjector>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progression for jobs submitted from now on
    pub fn set_progression(&self, states: &[&str]) {
        self.state.lock().unwrap().progression = states.iter().map(|s| s.to_string()).collect();
    }

    /// Register a job directly, as if submitted earlier
    pub fn add_job(&self, states: &[&str]) -> String {
        self.state.lock().unwrap().add_job(states)
    }

    pub fn inject(&self, op: MockOp, config: FailureConfig) {
        self.failures.lock().unwrap().inject(op, config);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Make local scripts exit 1
    pub fn fail_scripts(&self, fail: bool) {
        let mut failures = self.failures.lock().unwrap();
        if fail {
            failures.inject(MockOp::Script, FailureConfig::exit(1, "script failed"));
        } else {
            failures.clear_op(MockOp::Script);
        }
    }

    /// Make status queries answer with text no backend understands
    pub fn garble_status(&self, garble: bool) {
        let mut failures = self.failures.lock().unwrap();
        if garble {
            failures.inject(
                MockOp::Status,
                FailureConfig::garbage("slurm_load_jobs error: Socket timed out on send/recv\n"),
            );
        } else {
            failures.clear_op(MockOp::Status);
        }
    }

    pub fn submit_count(&self) -> usize {
        self.state.lock().unwrap().submitted_scripts.len()
    }

    /// Script paths passed to `sbatch`
    pub fn submitted_scripts(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted_scripts.clone()
    }

    pub fn status_queries(&self) -> usize {
        self.state.lock().unwrap().status_queries
    }

    /// Job ids passed to `scancel`
    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }

    /// Local scripts run, in order
    pub fn scripts_run(&self) -> Vec<String> {
        self.state.lock().unwrap().scripts_run.clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().unwrap().invocations.clone()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap().sleeps.clone()
    }

    /// Current Slurm state of a job
    pub fn job_state(&self, job_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .get(job_id)
            .map(|job| job.current().to_string())
    }

    fn failure(&self, op: MockOp) -> Option<FailureConfig> {
        self.failures.lock().unwrap().check(op)
    }

    fn answer(&self, args: &[String]) -> (i32, String) {
        let program = args.first().map(String::as_str).unwrap_or("");
        let op = match program {
            "sbatch" => Some(MockOp::Submit),
            "squeue" | "sacct" => Some(MockOp::Status),
            "scancel" => Some(MockOp::Cancel),
            "mkdir" => Some(MockOp::Mkdir),
            _ => None,
        };
        if let Some(config) = op.and_then(|op| self.failure(op)) {
            if op == Some(MockOp::Status) {
                self.state.lock().unwrap().status_queries += 1;
            }
            return (config.exit_code.unwrap_or(0), config.output);
        }

        let last = args.last().map(String::as_str).unwrap_or("");
        let mut state = self.state.lock().unwrap();
        match program {
            "sbatch" => {
                let job_id = state.submit(last);
                (0, format!("Submitted batch job {}\n", job_id))
            }
            "squeue" => {
                if !state.jobs.contains_key(last) {
                    state.status_queries += 1;
                    return (1, "slurm_load_jobs error: Invalid job id specified\n".to_string());
                }
                match state.squeue(last) {
                    Some(s) => (0, format!("{}\n", s)),
                    None => (0, String::new()),
                }
            }
            "sacct" => match state.sacct(last) {
                Some(s) => (0, format!("{:>10} \n{:>10} \n", s, s)),
                None => (0, String::new()),
            },
            "scancel" => {
                if state.cancel(last) {
                    (0, String::new())
                } else {
                    (1, format!("scancel: error: Invalid job id {}\n", last))
                }
            }
            _ => (0, String::new()),
        }
    }
}

impl CommandRunner for MockCluster {
    fn run(
        &self,
        command: &Command,
        remote: Option<&RemoteHost>,
        rootdir: &str,
        workdir: &str,
        ignore_exit_failure: bool,
    ) -> Result<String, ExecError> {
        let text = command.to_shell_string();
        self.state.lock().unwrap().invocations.push(Invocation {
            command: text.clone(),
            remote: remote.map(|r| r.host.clone()),
            dir: join_dir(rootdir, workdir),
        });

        let (code, output) = match command {
            Command::Argv(args) => self.answer(args),
            Command::Shell(_) => (0, String::new()),
        };

        if code == 0 || ignore_exit_failure {
            Ok(output)
        } else {
            Err(ExecError::NonZeroExit {
                command: text,
                code: Some(code),
                output,
            })
        }
    }

    fn upload(&self, local: &Path, remote: &RemoteHost, remote_path: &str) -> Result<(), ExecError> {
        if let Some(config) = self.failure(MockOp::Upload) {
            return Err(ExecError::Transfer {
                local: local.display().to_string(),
                destination: format!("{}:{}", remote.host, remote_path),
                output: config.output,
            });
        }
        let contents = fs::read_to_string(local)?;
        self.state.lock().unwrap().uploads.push(Upload {
            local: local.to_path_buf(),
            host: remote.host.clone(),
            remote_path: remote_path.to_string(),
            contents,
        });
        Ok(())
    }

    fn run_script(&self, script: &str) -> Result<String, ExecError> {
        self.state.lock().unwrap().scripts_run.push(script.to_string());
        match self.failure(MockOp::Script) {
            Some(config) => Err(ExecError::NonZeroExit {
                command: "<local script>".to_string(),
                code: config.exit_code.or(Some(1)),
                output: config.output,
            }),
            None => Ok(String::new()),
        }
    }

    fn sleep(&self, interval: Duration) {
        self.state.lock().unwrap().sleeps.push(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(cluster: &MockCluster, args: &[&str]) -> Result<String, ExecError> {
        cluster.run(&Command::argv(args.iter().copied()), None, "", "", false)
    }

    #[test]
    fn test_sbatch_and_status() {
        let cluster = MockCluster::new();
        cluster.set_progression(&["RUNNING", "COMPLETED"]);

        let out = run(&cluster, &["sbatch", "job.slr"]).unwrap();
        let job_id = out.trim().rsplit(' ').next().unwrap().to_string();
        assert_eq!(cluster.submit_count(), 1);

        let out = run(&cluster, &["squeue", "-h", "-o", "%T", "-j", &job_id]).unwrap();
        assert_eq!(out.trim(), "RUNNING");
        let out = run(&cluster, &["squeue", "-h", "-o", "%T", "-j", &job_id]).unwrap();
        assert_eq!(out, "");
        let out = run(&cluster, &["sacct", "--format=state", "-n", "-j", &job_id]).unwrap();
        assert_eq!(out.lines().next().unwrap().trim(), "COMPLETED");
    }

    #[test]
    fn test_unknown_job() {
        let cluster = MockCluster::new();
        let err = run(&cluster, &["squeue", "-j", "42"]).unwrap_err();
        assert!(matches!(err, ExecError::NonZeroExit { code: Some(1), .. }));

        let out = cluster
            .run(&Command::argv(["squeue", "-j", "42"]), None, "", "", true)
            .unwrap();
        assert!(out.contains("Invalid job id"));
    }

    #[test]
    fn test_injected_submit_failure() {
        let cluster = MockCluster::new();
        cluster.inject(
            MockOp::Submit,
            FailureConfig::exit(1, "sbatch: error: Batch job submission failed").with_fail_count(1),
        );
        assert!(run(&cluster, &["sbatch", "a.slr"]).is_err());
        assert!(run(&cluster, &["sbatch", "a.slr"]).is_ok());
        assert_eq!(cluster.submit_count(), 1);
    }

    #[test]
    fn test_records_invocations() {
        let cluster = MockCluster::new();
        let remote = RemoteHost::new("login1");
        cluster
            .run(&Command::argv(["mkdir", "-p", "run"]), Some(&remote), "~", "run", false)
            .unwrap();
        let invocations = cluster.invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].command, "mkdir -p run");
        assert_eq!(invocations[0].remote.as_deref(), Some("login1"));
        assert_eq!(invocations[0].dir, "~/run");
    }

    #[test]
    fn test_sleep_is_recorded() {
        let cluster = MockCluster::new();
        cluster.sleep(Duration::from_secs(5));
        assert_eq!(cluster.sleeps(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn test_scripts() {
        let cluster = MockCluster::new();
        assert!(cluster.run_script("echo ok").is_ok());
        cluster.fail_scripts(true);
        let err = cluster.run_script("exit 1").unwrap_err();
        assert_eq!(err.output(), Some("script failed"));
        assert_eq!(cluster.scripts_run().len(), 2);
    }
}
