//! The scheduler backend capability interface.

use crate::command::Command;
use crate::error::BackendError;
use crate::resources::{ResourceMap, ResourceValue};
use crate::status::StatusCode;

/// Resource keys every backend must translate
pub const COMMON_KEYS: &[&str] = &[
    "jobname", "queue", "time", "nodes", "threads", "mem", "stdout", "stderr",
];

/// Scheduler-neutral environment placeholders available to job bodies.
///
/// Each is written `$CLUSTERJOB_X` or `${CLUSTERJOB_X}` and is rewritten
/// to the scheduler's native variable at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobVar {
    JobId,
    WorkDir,
    SubmitHost,
    JobName,
    ArrayIndex,
    NodeList,
}

impl JobVar {
    pub const ALL: [JobVar; 6] = [
        JobVar::JobId,
        JobVar::WorkDir,
        JobVar::SubmitHost,
        JobVar::JobName,
        JobVar::ArrayIndex,
        JobVar::NodeList,
    ];

    /// Placeholder name without the leading `$`
    pub fn placeholder(&self) -> &'static str {
        match self {
            JobVar::JobId => "CLUSTERJOB_ID",
            JobVar::WorkDir => "CLUSTERJOB_WORKDIR",
            JobVar::SubmitHost => "CLUSTERJOB_SUBMIT_HOST",
            JobVar::JobName => "CLUSTERJOB_NAME",
            JobVar::ArrayIndex => "CLUSTERJOB_ARRAY_INDEX",
            JobVar::NodeList => "CLUSTERJOB_NODELIST",
        }
    }

    pub fn from_placeholder(name: &str) -> Option<JobVar> {
        JobVar::ALL.into_iter().find(|v| v.placeholder() == name)
    }
}

/// How a scheduler exposes a job variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeVar {
    /// An environment variable name, e.g. `SLURM_JOB_ID`
    Env(&'static str),
    /// Shell text substituted verbatim, e.g. `` `cat $PBS_NODEFILE` ``
    Shell(&'static str),
}

/// Capabilities of one scheduler family.
///
/// Implementations are stateless apart from fixed tables.
pub trait SchedulerBackend: Send + Sync {
    /// Registry name, e.g. `slurm`
    fn name(&self) -> &'static str;

    /// Extension of rendered job scripts, without the dot
    fn extension(&self) -> &'static str;

    /// Directive prefix for header lines, e.g. `#SBATCH`
    fn prefix(&self) -> &'static str;

    /// Resources merged under a job's own when this backend is selected
    fn default_resources(&self) -> ResourceMap {
        ResourceMap::new()
    }

    /// Command that submits the script at `script` (a path on the target host)
    fn submit_command(&self, script: &str) -> Command;

    /// Extract the job id from the submit command's combined output
    fn parse_job_id(&self, output: &str) -> Option<String>;

    /// Command that queries status. `finished` selects the fallback query
    /// for jobs that have already left the live queue.
    fn status_command(&self, job_id: &str, finished: bool) -> Command;

    /// Decode the status command's output; `None` means undeterminable
    fn parse_status(&self, output: &str, finished: bool) -> Option<StatusCode>;

    fn cancel_command(&self, job_id: &str) -> Command;

    /// Header options (without the prefix) for the given resources
    fn resource_header_lines(&self, resources: &ResourceMap) -> Result<Vec<String>, BackendError>;

    /// Native spelling of a job variable
    fn native_var(&self, var: JobVar) -> NativeVar;

    /// Replace every `$CLUSTERJOB_X` / `${CLUSTERJOB_X}` with the native form
    fn rewrite_environment_placeholders(&self, body: &str) -> String {
        rewrite_placeholders(body, |var| self.native_var(var))
    }
}

/// Rewrite job-variable placeholders in `body`.
///
/// Unknown `CLUSTERJOB_*` names and ordinary shell variables are left alone.
pub fn rewrite_placeholders<F>(body: &str, native: F) -> String
where
    F: Fn(JobVar) -> NativeVar,
{
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, braced, consumed) = if let Some(inner) = after.strip_prefix('{') {
            match inner.find('}') {
                Some(end) => (&inner[..end], true, end + 2),
                None => ("", true, 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], false, end)
        };

        match JobVar::from_placeholder(name) {
            Some(var) => {
                match native(var) {
                    NativeVar::Env(env) if braced => {
                        out.push_str("${");
                        out.push_str(env);
                        out.push('}');
                    }
                    NativeVar::Env(env) => {
                        out.push('$');
                        out.push_str(env);
                    }
                    NativeVar::Shell(text) => out.push_str(text),
                }
                rest = &after[consumed..];
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Translation of resources that have no entry in a backend's table
pub(crate) enum OptionStyle {
    /// `-k value` for single letters, `--key=value` otherwise (Slurm)
    DoubleDash,
    /// `-k value` for single letters, `-l key=value` otherwise (PBS)
    ResourceList,
    /// `-key value` (LSF, SGE)
    SingleDash,
}

/// Render an unknown resource with the backend's generic convention.
///
/// Booleans become bare flags when true and are dropped when false.
pub(crate) fn generic_option(style: OptionStyle, key: &str, value: &ResourceValue) -> Option<String> {
    let single = key.chars().count() == 1;
    if let ResourceValue::Bool(flag) = value {
        if !flag {
            return None;
        }
        return Some(match style {
            OptionStyle::DoubleDash if !single => format!("--{}", key),
            _ => format!("-{}", key),
        });
    }
    Some(match style {
        _ if single => format!("-{} {}", key, value),
        OptionStyle::DoubleDash => format!("--{}={}", key, value),
        OptionStyle::ResourceList => format!("-l {}={}", key, value),
        OptionStyle::SingleDash => format!("-{} {}", key, value),
    })
}

/// Number of the whitespace-separated column headed `name` in a table
pub(crate) fn column_index(header: &str, name: &str) -> Option<usize> {
    header.split_whitespace().position(|col| col == name)
}
