//! Conformance report
//!
//! Runs every registered backend through the capability check and the
//! script renderer, and drives a complete submission lifecycle against the
//! mock cluster. The result is a structured report for `check-backends`.
//!
//! Categories:
//! - `backend:<name>`: capability check, script layout, render determinism
//! - `lifecycle`: submit, poll, epilogue, cache reuse and failed submission

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clusterjob_backends::{
    canonical_resources, check_backend, BackendRegistry, SchedulerBackend, StatusCode,
};

use crate::config::{AttributeOverrides, JobDefaults};
use crate::job::{JobEnvironment, JobSpec, SubmitOptions};
use crate::mock::{FailureConfig, MockCluster, MockOp};
use crate::render::{ScriptRenderer, TemplateContext};

/// Schema version for conformance reports
pub const CONFORMANCE_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for conformance reports
pub const CONFORMANCE_SCHEMA_ID: &str = "clusterjob/conformance_report@1";

const SAMPLE_BODY: &str = "echo \"job $CLUSTERJOB_ID in ${CLUSTERJOB_WORKDIR}\"\nhostname\n";

/// Overall conformance report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConformanceReport {
    /// Schema version
    pub schema_version: u32,
    /// Schema identifier
    pub schema_id: String,
    /// When the report was generated
    pub created_at: DateTime<Utc>,
    /// Overall pass/fail status
    pub passed: bool,
    pub category_count: usize,
    pub test_count: usize,
    pub passed_count: usize,
    pub failed_count: usize,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    pub categories: Vec<CategoryReport>,
}

impl ConformanceReport {
    pub fn new() -> Self {
        Self {
            schema_version: CONFORMANCE_SCHEMA_VERSION,
            schema_id: CONFORMANCE_SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            passed: true,
            category_count: 0,
            test_count: 0,
            passed_count: 0,
            failed_count: 0,
            duration_ms: 0,
            categories: Vec::new(),
        }
    }

    pub fn add_category(&mut self, cat: CategoryReport) {
        self.category_count += 1;
        self.test_count += cat.test_count;
        self.passed_count += cat.passed_count;
        self.failed_count += cat.failed_count;
        self.duration_ms += cat.duration_ms;
        if !cat.passed {
            self.passed = false;
        }
        self.categories.push(cat);
    }

    pub fn finalize(&mut self) {
        self.passed = self.failed_count == 0;
    }

    /// Convert to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 0 = pass, 1 = fail
    pub fn exit_code(&self) -> i32 {
        if self.passed {
            0
        } else {
            1
        }
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Backend Conformance ===\n");
        out.push_str(&format!("Status: {}\n", if self.passed { "PASS" } else { "FAIL" }));
        out.push_str(&format!(
            "Tests: {} total, {} passed, {} failed\n\n",
            self.test_count, self.passed_count, self.failed_count
        ));
        for cat in &self.categories {
            let mark = if cat.passed { "ok " } else { "ERR" };
            out.push_str(&format!(
                "  {} {} ({}/{} passed)\n",
                mark, cat.category, cat.passed_count, cat.test_count
            ));
            for result in cat.results.iter().filter(|r| !r.pass) {
                out.push_str(&format!("      - {}\n", result.test_name));
                if let Some(err) = &result.error {
                    out.push_str(&format!("        {}\n", err));
                }
            }
        }
        out
    }
}

impl Default for ConformanceReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Results of one category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryReport {
    pub category: String,
    pub passed: bool,
    pub test_count: usize,
    pub passed_count: usize,
    pub failed_count: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl CategoryReport {
    pub fn new(category: String) -> Self {
        Self {
            category,
            passed: true,
            test_count: 0,
            passed_count: 0,
            failed_count: 0,
            duration_ms: 0,
            results: Vec::new(),
        }
    }

    pub fn add_result(&mut self, result: TestResult) {
        self.test_count += 1;
        self.duration_ms += result.duration_ms;
        if result.pass {
            self.passed_count += 1;
        } else {
            self.failed_count += 1;
            self.passed = false;
        }
        self.results.push(result);
    }
}

/// One check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub pass: bool,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Error message if failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    pub fn pass(test_name: &str, duration: Duration) -> Self {
        Self {
            test_name: test_name.to_string(),
            pass: true,
            duration_ms: duration.as_millis() as u64,
            error: None,
        }
    }

    pub fn fail(test_name: &str, duration: Duration, message: String) -> Self {
        Self {
            test_name: test_name.to_string(),
            pass: false,
            duration_ms: duration.as_millis() as u64,
            error: Some(message),
        }
    }

    /// A check that could not run
    pub fn error(test_name: &str, message: String) -> Self {
        Self {
            test_name: test_name.to_string(),
            pass: false,
            duration_ms: 0,
            error: Some(message),
        }
    }

    fn from_outcome(test_name: &str, start: Instant, outcome: Result<(), String>) -> Self {
        match outcome {
            Ok(()) => Self::pass(test_name, start.elapsed()),
            Err(message) => Self::fail(test_name, start.elapsed(), message),
        }
    }
}

/// Runs the conformance checks over a registry
pub struct ConformanceRunner {
    registry: Arc<BackendRegistry>,
}

impl ConformanceRunner {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self { registry }
    }

    /// Every backend, then the lifecycle
    pub fn run_all(&self) -> ConformanceReport {
        let mut report = ConformanceReport::new();
        for backend in self.registry.iter() {
            report.add_category(self.run_backend(backend.as_ref()));
        }
        report.add_category(self.run_lifecycle());
        report.finalize();
        report
    }

    /// Selected categories: a backend name, `backends` or `lifecycle`
    pub fn run_categories(&self, categories: &[&str]) -> ConformanceReport {
        let mut report = ConformanceReport::new();
        for &name in categories {
            match name {
                "lifecycle" => report.add_category(self.run_lifecycle()),
                "backends" => {
                    for backend in self.registry.iter() {
                        report.add_category(self.run_backend(backend.as_ref()));
                    }
                }
                other => match self.registry.get(other) {
                    Some(backend) => report.add_category(self.run_backend(backend.as_ref())),
                    None => {
                        let mut cat = CategoryReport::new(other.to_string());
                        cat.add_result(TestResult::error(
                            "unknown_category",
                            format!("Unknown category or backend: {}", other),
                        ));
                        report.add_category(cat);
                    }
                },
            }
        }
        report.finalize();
        report
    }

    /// Checks for one backend
    pub fn run_backend(&self, backend: &dyn SchedulerBackend) -> CategoryReport {
        let mut cat = CategoryReport::new(format!("backend:{}", backend.name()));

        let start = Instant::now();
        cat.add_result(TestResult::from_outcome(
            "capability_check",
            start,
            check_backend(backend).map_err(|e| e.to_string()),
        ));

        let start = Instant::now();
        cat.add_result(TestResult::from_outcome(
            "script_layout",
            start,
            check_script_layout(backend),
        ));

        let start = Instant::now();
        cat.add_result(TestResult::from_outcome(
            "render_deterministic",
            start,
            check_render_deterministic(backend),
        ));

        cat
    }

    /// Submission lifecycle against the mock cluster
    pub fn run_lifecycle(&self) -> CategoryReport {
        let mut cat = CategoryReport::new("lifecycle".to_string());

        let checks: [(&str, fn(&BackendRegistry) -> Result<(), String>); 4] = [
            ("submit_and_complete", lifecycle_submit_and_complete),
            ("epilogue_runs_once", lifecycle_epilogue_runs_once),
            ("cache_reuse_skips_submission", lifecycle_cache_reuse),
            ("unparseable_submission_fails", lifecycle_unparseable_submission),
        ];
        for (name, check) in checks {
            if !self.registry.contains("slurm") {
                cat.add_result(TestResult::error(name, "slurm backend not registered".to_string()));
                continue;
            }
            let start = Instant::now();
            cat.add_result(TestResult::from_outcome(name, start, check(self.registry.as_ref())));
        }
        cat
    }
}

fn render_sample(backend: &dyn SchedulerBackend) -> Result<String, String> {
    let mut resources = canonical_resources();
    resources.merge_defaults(&backend.default_resources());
    let overrides = AttributeOverrides::default();
    let variables = BTreeMap::new();
    let defaults = JobDefaults::default();
    let context = TemplateContext {
        resources: &resources,
        overrides: &overrides,
        variables: &variables,
        fulldir: "",
        defaults: &defaults,
    };
    ScriptRenderer::new(backend, "/bin/bash", context)
        .render(SAMPLE_BODY, true)
        .map_err(|e| e.to_string())
}

/// Interpreter line, prefixed headers, blank line, body
fn check_script_layout(backend: &dyn SchedulerBackend) -> Result<(), String> {
    let script = render_sample(backend)?;
    let mut lines = script.lines();
    if lines.next() != Some("#!/bin/bash") {
        return Err("first line is not the interpreter line".to_string());
    }
    let mut headers = 0;
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
        if !line.starts_with(&format!("{} ", backend.prefix())) {
            return Err(format!("header line without prefix: {:?}", line));
        }
        headers += 1;
    }
    if headers == 0 {
        return Err("no header lines for the canonical resources".to_string());
    }
    let body: Vec<&str> = lines.collect();
    if body.last() != Some(&"hostname") {
        return Err(format!("body not preserved after the blank line: {:?}", body));
    }
    if script.contains("CLUSTERJOB_") {
        return Err("job variable left in rendered script".to_string());
    }
    Ok(())
}

fn check_render_deterministic(backend: &dyn SchedulerBackend) -> Result<(), String> {
    let first = render_sample(backend)?;
    let second = render_sample(backend)?;
    if first == second {
        Ok(())
    } else {
        Err("two renders of the same input differ".to_string())
    }
}

fn lifecycle_job(
    registry: &BackendRegistry,
    cluster: &Arc<MockCluster>,
    folder: &std::path::Path,
) -> Result<JobSpec, String> {
    let env = JobEnvironment::new(JobDefaults::default(), registry.clone(), cluster.clone())
        .map_err(|e| e.to_string())?;
    let mut job = JobSpec::new("echo {message}\n", "conformance", &env).map_err(|e| e.to_string())?;
    job.set_backend("slurm").map_err(|e| e.to_string())?;
    job.set_variable("message", "hello").map_err(|e| e.to_string())?;
    let folder = folder.to_string_lossy();
    job.set_rootdir(&folder);
    job.set_cache_folder(Some(&format!("{}/cache", folder)))
        .map_err(|e| e.to_string())?;
    Ok(job)
}

fn scratch() -> Result<tempfile::TempDir, String> {
    tempfile::TempDir::new().map_err(|e| e.to_string())
}

fn blocking(cache_id: &str) -> SubmitOptions {
    SubmitOptions {
        block: true,
        cache_id: Some(cache_id.to_string()),
        ..SubmitOptions::default()
    }
}

fn lifecycle_submit_and_complete(registry: &BackendRegistry) -> Result<(), String> {
    let dir = scratch()?;
    let cluster = Arc::new(MockCluster::new());
    let job = lifecycle_job(registry, &cluster, dir.path())?;
    let record = job.submit(blocking("complete")).map_err(|e| e.to_string())?;
    match record.last_status() {
        StatusCode::Completed => Ok(()),
        other => Err(format!("expected COMPLETED, got {}", other)),
    }
}

fn lifecycle_epilogue_runs_once(registry: &BackendRegistry) -> Result<(), String> {
    let dir = scratch()?;
    let cluster = Arc::new(MockCluster::new());
    let mut job = lifecycle_job(registry, &cluster, dir.path())?;
    job.set_epilogue("echo finished {jobname}");
    let mut record = job.submit(blocking("epilogue")).map_err(|e| e.to_string())?;
    record.status().map_err(|e| e.to_string())?;
    match cluster.scripts_run().len() {
        1 => Ok(()),
        n => Err(format!("epilogue ran {} times", n)),
    }
}

fn lifecycle_cache_reuse(registry: &BackendRegistry) -> Result<(), String> {
    let dir = scratch()?;
    let cluster = Arc::new(MockCluster::new());
    let job = lifecycle_job(registry, &cluster, dir.path())?;
    let options = SubmitOptions {
        cache_id: Some("reuse".to_string()),
        ..SubmitOptions::default()
    };
    let first = job.submit(options.clone()).map_err(|e| e.to_string())?;
    let second = job.submit(options).map_err(|e| e.to_string())?;
    if cluster.submit_count() != 1 {
        return Err(format!("submitted {} times", cluster.submit_count()));
    }
    if first.job_id() != second.job_id() {
        return Err("cached record has a different job id".to_string());
    }
    Ok(())
}

fn lifecycle_unparseable_submission(registry: &BackendRegistry) -> Result<(), String> {
    let dir = scratch()?;
    let cluster = Arc::new(MockCluster::new());
    cluster.inject(MockOp::Submit, FailureConfig::garbage("sbatch: queued, maybe\n"));
    let job = lifecycle_job(registry, &cluster, dir.path())?;
    let record = job
        .submit(SubmitOptions {
            cache_id: Some("garbage".to_string()),
            ..SubmitOptions::default()
        })
        .map_err(|e| e.to_string())?;
    if record.last_status() != StatusCode::Failed || !record.job_id().is_empty() {
        return Err(format!(
            "expected FAILED with empty job id, got {} '{}'",
            record.last_status(),
            record.job_id()
        ));
    }
    Ok(())
}
