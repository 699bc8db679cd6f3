//! Backend conformance check.
//!
//! Every backend must translate the common resource keys, produce non-empty
//! commands and rewrite every job variable. The check fails with the first
//! missing capability instead of letting a backend degrade silently.

use crate::backend::{JobVar, SchedulerBackend, COMMON_KEYS};
use crate::error::ConformanceError;
use crate::resources::ResourceMap;

/// The resources every backend is checked against
pub fn canonical_resources() -> ResourceMap {
    let mut res = ResourceMap::new();
    res.insert_static("jobname", "testjob");
    res.insert_static("queue", "testqueue");
    res.insert_static("time", "01:00:00");
    res.insert_static("nodes", 1);
    res.insert_static("threads", 1);
    res.insert_static("mem", 1024);
    res.insert_static("stdout", "stdout.log");
    res.insert_static("stderr", "stderr.log");
    res
}

/// Validate a backend before it is registered
pub fn check_backend(backend: &dyn SchedulerBackend) -> Result<(), ConformanceError> {
    let missing = |capability: String| ConformanceError {
        backend: backend.name().to_string(),
        capability,
    };

    let name = backend.name();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(missing("a non-empty name without whitespace".to_string()));
    }
    if backend.extension().is_empty() || backend.extension().contains('.') {
        return Err(missing("a script extension (without leading dot)".to_string()));
    }
    if !backend.prefix().starts_with('#') {
        return Err(missing("a header prefix starting with '#'".to_string()));
    }

    let resources = canonical_resources();
    for &key in COMMON_KEYS {
        if !resources.contains_key(key) {
            return Err(missing(format!("test value for resource key '{}'", key)));
        }
    }
    for &key in COMMON_KEYS {
        let mut single = ResourceMap::new();
        if let Some(value) = resources.get(key) {
            single.insert_static(key, value.clone());
        }
        backend
            .resource_header_lines(&single)
            .map_err(|e| missing(format!("translation of resource '{}': {}", key, e)))?;
    }
    let lines = backend
        .resource_header_lines(&resources)
        .map_err(|e| missing(format!("resource translation: {}", e)))?;
    if let Some(bad) = lines.iter().find(|l| l.trim().is_empty() || l.contains('\n')) {
        return Err(missing(format!("single-line header options (got {:?})", bad)));
    }

    let commands = [
        ("submit command", backend.submit_command("xxx")),
        ("running status command", backend.status_command("xxx", false)),
        ("finished status command", backend.status_command("xxx", true)),
        ("cancel command", backend.cancel_command("xxx")),
    ];
    for (what, command) in commands {
        if command.is_empty() {
            return Err(missing(format!("a non-empty {}", what)));
        }
    }

    for var in JobVar::ALL {
        let placeholder = var.placeholder();
        let body = format!("${} ${{{}}}", placeholder, placeholder);
        if backend.rewrite_environment_placeholders(&body).contains(placeholder) {
            return Err(missing(format!("job variable ${}", placeholder)));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NativeVar;
    use crate::command::Command;
    use crate::error::BackendError;
    use crate::status::StatusCode;
    use crate::Slurm;

    /// Delegates to Slurm but drops one capability
    struct Broken {
        empty_cancel: bool,
        keep_placeholder: bool,
        reject_time: bool,
    }

    impl SchedulerBackend for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn extension(&self) -> &'static str {
            "brk"
        }
        fn prefix(&self) -> &'static str {
            "#BRK"
        }
        fn submit_command(&self, script: &str) -> Command {
            Slurm.submit_command(script)
        }
        fn parse_job_id(&self, output: &str) -> Option<String> {
            Slurm.parse_job_id(output)
        }
        fn status_command(&self, job_id: &str, finished: bool) -> Command {
            Slurm.status_command(job_id, finished)
        }
        fn parse_status(&self, output: &str, finished: bool) -> Option<StatusCode> {
            Slurm.parse_status(output, finished)
        }
        fn cancel_command(&self, job_id: &str) -> Command {
            if self.empty_cancel {
                Command::argv(Vec::<String>::new())
            } else {
                Slurm.cancel_command(job_id)
            }
        }
        fn resource_header_lines(&self, resources: &ResourceMap) -> Result<Vec<String>, BackendError> {
            if self.reject_time && resources.contains_key("time") {
                return Err(BackendError::InvalidTime("01:00:00".to_string()));
            }
            Slurm.resource_header_lines(resources)
        }
        fn native_var(&self, var: JobVar) -> NativeVar {
            Slurm.native_var(var)
        }
        fn rewrite_environment_placeholders(&self, body: &str) -> String {
            if self.keep_placeholder {
                body.to_string()
            } else {
                Slurm.rewrite_environment_placeholders(body)
            }
        }
    }

    fn broken() -> Broken {
        Broken {
            empty_cancel: false,
            keep_placeholder: false,
            reject_time: false,
        }
    }

    #[test]
    fn test_working_backend_passes() {
        assert!(check_backend(&broken()).is_ok());
    }

    #[test]
    fn test_names_missing_cancel() {
        let err = check_backend(&Broken { empty_cancel: true, ..broken() }).unwrap_err();
        assert_eq!(err.backend, "broken");
        assert!(err.capability.contains("cancel command"));
    }

    #[test]
    fn test_names_missing_job_variable() {
        let err = check_backend(&Broken { keep_placeholder: true, ..broken() }).unwrap_err();
        assert!(err.capability.contains("$CLUSTERJOB_ID"));
    }

    #[test]
    fn test_names_untranslatable_resource() {
        let err = check_backend(&Broken { reject_time: true, ..broken() }).unwrap_err();
        assert!(err.capability.contains("'time'"));
        assert!(err.to_string().contains("broken"));
    }
}
