//! Failure injection for the mock cluster

use std::collections::HashMap;

/// Interactions of the mock cluster that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// `sbatch`
    Submit,
    /// `squeue` and `sacct`
    Status,
    /// `scancel`
    Cancel,
    /// `mkdir` and other directory commands
    Mkdir,
    /// Copies to the remote host
    Upload,
    /// Local prologue and epilogue scripts
    Script,
}

/// What an injected failure looks like
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Exit code to report; None exits 0 with `output`
    pub exit_code: Option<i32>,
    /// Combined output of the failing command
    pub output: String,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Exit non-zero with `output`
    pub fn exit(code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            output: output.into(),
            fail_count: None,
        }
    }

    /// Exit 0 but print `output` instead of the expected answer
    pub fn garbage(output: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            output: output.into(),
            fail_count: None,
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Failure injector for the mock cluster
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<MockOp, FailureConfig>,
    call_counts: HashMap<MockOp, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for an operation
    pub fn inject(&mut self, op: MockOp, config: FailureConfig) {
        self.configs.insert(op, config);
        self.call_counts.insert(op, 0);
    }

    /// Clear failure injection for one operation
    pub fn clear_op(&mut self, op: MockOp) {
        self.configs.remove(&op);
        self.call_counts.remove(&op);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    /// The failure to apply to this call of `op`, if any
    pub fn check(&mut self, op: MockOp) -> Option<FailureConfig> {
        let config = self.configs.get(&op)?;
        let count = self.call_counts.entry(op).or_insert(0);
        *count += 1;

        if let Some(limit) = config.fail_count {
            if *count > limit {
                return None;
            }
        }
        Some(config.clone())
    }
}
