//! Submission lifecycle tests
//!
//! Submit, poll, cancel and finish jobs against the mock cluster.

mod fixtures;

use std::time::Duration;

use clusterjob::job::{JobError, SubmitOptions};
use clusterjob::mock::{FailureConfig, MockOp};
use clusterjob::state::{CacheEntry, SubmissionError};
use clusterjob::StatusCode;

use fixtures::{printenv_job, Harness};

fn options(cache_id: &str) -> SubmitOptions {
    SubmitOptions {
        cache_id: Some(cache_id.to_string()),
        ..SubmitOptions::default()
    }
}

fn blocking(cache_id: &str) -> SubmitOptions {
    SubmitOptions {
        block: true,
        ..options(cache_id)
    }
}

// =============================================================================
// Happy path
// =============================================================================

#[test]
fn test_blocking_submit_completes() {
    let harness = Harness::new();
    let job = printenv_job(&harness);

    let record = job.submit(blocking("printenv")).unwrap();

    assert_eq!(record.last_status(), StatusCode::Completed);
    assert_eq!(record.job_id(), "1000");
    assert_eq!(harness.cluster.submit_count(), 1);
    assert_eq!(harness.cluster.submitted_scripts(), vec!["printenv.slr"]);
    assert_eq!(harness.cluster.sleeps(), vec![Duration::from_secs(5)]);

    let script = std::fs::read_to_string(harness.run_dir().join("printenv.slr")).unwrap();
    assert!(script.starts_with("#!/bin/bash\n#SBATCH --job-name=printenv\n"));
}

#[test]
fn test_status_walks_scheduler_states() {
    let harness = Harness::new();
    let job = harness.job("hostname\n", "walk");

    let mut record = job.submit(options("walk")).unwrap();
    assert_eq!(record.last_status(), StatusCode::Pending);

    assert_eq!(record.status().unwrap(), StatusCode::Pending);
    assert!(!record.ready().unwrap());
    assert_eq!(record.last_status(), StatusCode::Running);
    assert!(record.successful().unwrap());
    assert_eq!(record.last_status(), StatusCode::Completed);
}

#[test]
fn test_successful_requires_finished_job() {
    let harness = Harness::new();
    harness.cluster.set_progression(&["RUNNING"]);
    let job = harness.job("hostname\n", "busy");

    let mut record = job.submit(options("busy")).unwrap();
    assert!(matches!(
        record.successful(),
        Err(SubmissionError::NotFinished(StatusCode::Running))
    ));
}

#[test]
fn test_finished_record_does_not_query() {
    let harness = Harness::new();
    let job = harness.job("hostname\n", "quiet");

    let mut record = job.submit(blocking("quiet")).unwrap();
    let queries = harness.cluster.status_queries();

    assert_eq!(record.status().unwrap(), StatusCode::Completed);
    assert!(record.ready().unwrap());
    assert!(record.successful().unwrap());
    assert_eq!(harness.cluster.status_queries(), queries);
}

#[test]
fn test_wait_timeout_returns_unfinished_status() {
    let harness = Harness::new();
    harness.cluster.set_progression(&["RUNNING"]);
    let job = harness.job("sleep 1000\n", "slow");

    let mut record = job.submit(options("slow")).unwrap();
    let status = record.wait(Some(Duration::from_secs(12))).unwrap();

    assert_eq!(status, StatusCode::Running);
    assert_eq!(
        harness.cluster.sleeps(),
        vec![Duration::from_secs(5), Duration::from_secs(10)]
    );
}

#[test]
fn test_backoff_respects_walltime_ceiling() {
    let harness = Harness::new();
    harness
        .cluster
        .set_progression(&["PENDING", "PENDING", "PENDING", "RUNNING", "RUNNING", "COMPLETED"]);
    let mut job = harness.job("hostname\n", "ceiling");
    // A tenth of the requested wall time
    job.set_resource("time", "00:02:00").unwrap();

    let record = job.submit(blocking("ceiling")).unwrap();

    assert_eq!(record.poll_policy().ceiling, 12);
    assert_eq!(record.last_status(), StatusCode::Completed);
    for interval in harness.cluster.sleeps() {
        assert!(interval <= Duration::from_secs(12));
    }
}

// =============================================================================
// Epilogue
// =============================================================================

#[test]
fn test_epilogue_runs_once_after_completion() {
    let harness = Harness::new();
    let mut job = harness.job("hostname\n", "fetch");
    job.set_epilogue("rsync -a cluster:{fulldir}/ results/");

    let mut record = job.submit(blocking("fetch")).unwrap();
    record.status().unwrap();
    record.get(None).unwrap();

    let scripts = harness.cluster.scripts_run();
    assert_eq!(scripts.len(), 1);
    assert!(scripts[0].starts_with("#!/bin/bash\n"));
    assert!(scripts[0].contains(&format!("rsync -a cluster:{}/ results/", harness.run_dir().display())));
}

#[test]
fn test_failing_epilogue_is_reported_and_not_retried() {
    let harness = Harness::new();
    harness.cluster.fail_scripts(true);
    let mut job = harness.job("hostname\n", "broken");
    job.set_epilogue("exit 1");

    let err = job.submit(blocking("broken")).unwrap_err();
    assert!(matches!(
        err,
        JobError::Submission(SubmissionError::Epilogue { .. })
    ));

    let entry = harness.store().load("broken").unwrap().unwrap();
    assert_eq!(entry.status, StatusCode::Completed);

    let mut resumed = harness.resume("broken");
    assert_eq!(resumed.status().unwrap(), StatusCode::Completed);
    assert_eq!(harness.cluster.scripts_run().len(), 1);
}

#[test]
fn test_failing_prologue_stops_submission() {
    let harness = Harness::new();
    harness.cluster.fail_scripts(true);
    let mut job = harness.job("hostname\n", "guarded");
    job.set_prologue("test -d {fulldir}");

    let err = job.submit(options("guarded")).unwrap_err();
    assert!(matches!(err, JobError::Prologue { .. }));
    assert_eq!(harness.cluster.submit_count(), 0);
    assert!(harness.store().load("guarded").unwrap().is_none());
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_cancel_records_cancelled() {
    let harness = Harness::new();
    let mut job = harness.job("sleep 100\n", "stop");
    job.set_epilogue("echo never");

    let mut record = job.submit(options("stop")).unwrap();
    let job_id = record.job_id().to_string();
    record.cancel().unwrap();

    assert_eq!(record.last_status(), StatusCode::Cancelled);
    assert_eq!(harness.cluster.cancelled(), vec![job_id.clone()]);
    assert_eq!(harness.cluster.job_state(&job_id).as_deref(), Some("CANCELLED"));
    assert!(harness.cluster.scripts_run().is_empty());

    let entry = harness.store().load("stop").unwrap().unwrap();
    assert_eq!(entry.status, StatusCode::Cancelled);

    // Finished records ignore a second cancel
    record.cancel().unwrap();
    assert_eq!(harness.cluster.cancelled().len(), 1);
}

#[test]
fn test_cancel_tolerates_scheduler_error() {
    let harness = Harness::new();
    harness
        .cluster
        .inject(MockOp::Cancel, FailureConfig::exit(1, "scancel: error: Access denied"));
    let job = harness.job("sleep 100\n", "denied");

    let mut record = job.submit(options("denied")).unwrap();
    record.cancel().unwrap();
    assert_eq!(record.last_status(), StatusCode::Cancelled);
}

// =============================================================================
// Scheduler failures
// =============================================================================

#[test]
fn test_rejected_submission_is_failed_record() {
    let harness = Harness::new();
    harness.cluster.inject(
        MockOp::Submit,
        FailureConfig::exit(1, "sbatch: error: invalid partition specified: nope"),
    );
    let job = harness.job("hostname\n", "rejected");

    let mut record = job.submit(options("rejected")).unwrap();

    assert_eq!(record.last_status(), StatusCode::Failed);
    assert_eq!(record.job_id(), "");
    assert_eq!(record.status().unwrap(), StatusCode::Failed);
    assert_eq!(harness.cluster.status_queries(), 0);
}

#[test]
fn test_unparseable_submit_output_is_failed_record() {
    let harness = Harness::new();
    harness
        .cluster
        .inject(MockOp::Submit, FailureConfig::garbage("queued, probably\n"));
    let job = harness.job("hostname\n", "garbled");

    let record = job.submit(blocking("garbled")).unwrap();
    assert_eq!(record.last_status(), StatusCode::Failed);
    assert_eq!(record.job_id(), "");
}

#[test]
fn test_undeterminable_status_is_error() {
    let harness = Harness::new();
    let job = harness.job("hostname\n", "lost");
    let mut record = job.submit(options("lost")).unwrap();

    harness.cluster.garble_status(true);
    match record.status() {
        Err(SubmissionError::UndeterminableStatus { job_id, output }) => {
            assert_eq!(job_id, record.job_id());
            assert!(output.contains("Socket timed out"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(record.last_status(), StatusCode::Pending);

    harness.cluster.garble_status(false);
    assert_eq!(record.status().unwrap(), StatusCode::Pending);
}

// =============================================================================
// Remote submission
// =============================================================================

#[test]
fn test_remote_submission_uploads_and_submits_over_ssh() {
    let harness = Harness::new();
    let mut job = harness.job("hostname\n", "far");
    job.set_remote(Some("login1")).unwrap();
    job.set_rootdir("~/jobs");
    job.add_aux_script("setup.sh", "module load {jobname}").unwrap();

    let record = job.submit(options("far")).unwrap();
    assert_eq!(record.remote().map(|r| r.host.as_str()), Some("login1"));

    let uploads = harness.cluster.uploads();
    let paths: Vec<_> = uploads.iter().map(|u| u.remote_path.as_str()).collect();
    assert_eq!(paths, vec!["~/jobs/far.slr", "~/jobs/setup.sh"]);
    assert!(uploads.iter().all(|u| u.host == "login1"));
    assert_eq!(uploads[1].contents, "#!/bin/bash\nmodule load far");

    let invocations = harness.cluster.invocations();
    let sbatch = invocations
        .iter()
        .find(|i| i.command.starts_with("sbatch"))
        .unwrap();
    assert_eq!(sbatch.remote.as_deref(), Some("login1"));
    assert_eq!(sbatch.dir, "~/jobs");

    let entry: CacheEntry = harness.store().load("far").unwrap().unwrap();
    assert_eq!(entry.remote.as_deref(), Some("login1"));
}
