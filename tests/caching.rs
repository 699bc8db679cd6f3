//! Caching and resumption tests
//!
//! A cache id names one submission: submitting again reuses it, a later
//! process resumes it, and only `force` or a failed run submits anew.

mod fixtures;

use clusterjob::job::{JobError, SubmitOptions};
use clusterjob::state::{CacheEntry, SubmissionError, SCHEMA_ID};
use clusterjob::StatusCode;

use fixtures::Harness;

fn options(cache_id: &str) -> SubmitOptions {
    SubmitOptions {
        cache_id: Some(cache_id.to_string()),
        ..SubmitOptions::default()
    }
}

// =============================================================================
// Reuse
// =============================================================================

#[test]
fn test_same_cache_id_submits_once() {
    let harness = Harness::new();
    let job = harness.job("hostname\n", "once");

    let first = job.submit(options("once")).unwrap();
    let second = job.submit(options("once")).unwrap();

    assert_eq!(harness.cluster.submit_count(), 1);
    assert_eq!(first.job_id(), second.job_id());
    assert_eq!(second.cache_file(), first.cache_file());
}

#[test]
fn test_distinct_cache_ids_submit_separately() {
    let harness = Harness::new();
    let job = harness.job("hostname\n", "twice");

    let a = job.submit(options("a")).unwrap();
    let b = job.submit(options("b")).unwrap();

    assert_eq!(harness.cluster.submit_count(), 2);
    assert_ne!(a.job_id(), b.job_id());
}

#[test]
fn test_reused_submission_can_block() {
    let harness = Harness::new();
    let job = harness.job("hostname\n", "later");

    job.submit(options("later")).unwrap();
    let record = job
        .submit(SubmitOptions {
            block: true,
            ..options("later")
        })
        .unwrap();

    assert_eq!(record.last_status(), StatusCode::Completed);
    assert_eq!(harness.cluster.submit_count(), 1);
    let entry = harness.store().load("later").unwrap().unwrap();
    assert_eq!(entry.status, StatusCode::Completed);
}

#[test]
fn test_force_resubmits() {
    let harness = Harness::new();
    let job = harness.job("hostname\n", "again");

    let first = job.submit(options("again")).unwrap();
    let second = job
        .submit(SubmitOptions {
            force: true,
            ..options("again")
        })
        .unwrap();

    assert_eq!(harness.cluster.submit_count(), 2);
    assert_ne!(first.job_id(), second.job_id());
    let entry = harness.store().load("again").unwrap().unwrap();
    assert_eq!(entry.job_id, second.job_id());
}

#[test]
fn test_retry_only_after_unsuccessful_run() {
    let harness = Harness::new();
    harness.cluster.set_progression(&["RUNNING", "FAILED"]);
    let job = harness.job("false\n", "flaky");
    let blocking = SubmitOptions {
        block: true,
        ..options("flaky")
    };

    let record = job.submit(blocking.clone()).unwrap();
    assert_eq!(record.last_status(), StatusCode::Failed);

    // Kept without retry
    let kept = job
        .submit(SubmitOptions {
            retry: false,
            ..options("flaky")
        })
        .unwrap();
    assert_eq!(kept.job_id(), record.job_id());
    assert_eq!(harness.cluster.submit_count(), 1);

    // Resubmitted with retry
    harness.cluster.set_progression(&["COMPLETED"]);
    let retried = job.submit(blocking).unwrap();
    assert_eq!(harness.cluster.submit_count(), 2);
    assert_eq!(retried.last_status(), StatusCode::Completed);

    // A completed run is never retried
    job.submit(options("flaky")).unwrap();
    assert_eq!(harness.cluster.submit_count(), 2);
}

#[test]
fn test_retry_after_cancellation() {
    let harness = Harness::new();
    let job = harness.job("sleep 100\n", "stopped");

    let mut first = job.submit(options("stopped")).unwrap();
    first.cancel().unwrap();
    let entry = harness.store().load("stopped").unwrap().unwrap();
    assert_eq!(entry.status, StatusCode::Cancelled);

    let kept = job
        .submit(SubmitOptions {
            retry: false,
            ..options("stopped")
        })
        .unwrap();
    assert_eq!(kept.job_id(), first.job_id());
    assert_eq!(kept.last_status(), StatusCode::Cancelled);

    let retried = job.submit(options("stopped")).unwrap();
    assert_ne!(retried.job_id(), first.job_id());
    assert_eq!(retried.last_status(), StatusCode::Pending);
    assert_eq!(harness.cluster.submit_count(), 2);
    let entry = harness.store().load("stopped").unwrap().unwrap();
    assert_eq!(entry.job_id, retried.job_id());
}

#[test]
fn test_failed_blocking_poll_keeps_cache_entry() {
    let harness = Harness::new();
    harness.cluster.garble_status(true);
    let job = harness.job("hostname\n", "blk");

    let err = job
        .submit(SubmitOptions {
            block: true,
            ..options("blk")
        })
        .unwrap_err();
    assert!(matches!(
        err,
        JobError::Submission(SubmissionError::UndeterminableStatus { .. })
    ));

    let entry = harness.store().load("blk").unwrap().unwrap();
    assert_eq!(entry.job_id, "1000");
    assert_eq!(entry.status, StatusCode::Pending);

    harness.cluster.garble_status(false);
    let record = job.submit(options("blk")).unwrap();
    assert_eq!(record.job_id(), "1000");
    assert_eq!(harness.cluster.submit_count(), 1);
}

// =============================================================================
// Resumption from the cache file
// =============================================================================

#[test]
fn test_resume_in_new_process() {
    let harness = Harness::new();
    let mut job = harness.job("hostname\n", "resumed");
    job.set_epilogue("echo done {jobname}");

    let job_id = {
        let record = job.submit(options("resumed")).unwrap();
        record.job_id().to_string()
    };

    let mut record = harness.resume("resumed");
    assert_eq!(record.job_id(), job_id);
    assert_eq!(record.backend().name(), "slurm");
    assert_eq!(record.epilogue(), Some("#!/bin/bash\necho done resumed"));
    assert_eq!(record.get(None).unwrap(), StatusCode::Completed);
    assert_eq!(harness.cluster.scripts_run().len(), 1);

    // The next process sees the finished job and does nothing
    let mut again = harness.resume("resumed");
    assert_eq!(again.status().unwrap(), StatusCode::Completed);
    assert_eq!(harness.cluster.scripts_run().len(), 1);
}

#[test]
fn test_cache_entry_layout() {
    let harness = Harness::new();
    let mut job = harness.job("hostname\n", "layout");
    job.set_resource("time", "01:00:00").unwrap();
    job.submit(options("layout")).unwrap();

    let path = harness.cache_dir().join("clusterjob.layout.cache");
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["schema_version"], 1);
    assert_eq!(raw["schema_id"], SCHEMA_ID);
    assert_eq!(raw["cache_id"], "layout");
    assert_eq!(raw["backend"], "slurm");
    assert_eq!(raw["status"], "PENDING");
    assert_eq!(raw["sleep_interval"], 360);
    assert_eq!(raw["resources"]["jobname"], "layout");
    assert_eq!(raw["resources"]["time"], "01:00:00");

    let entry = CacheEntry::from_file(&path).unwrap();
    assert_eq!(entry.job_id, "1000");
    assert!(entry.epilogue.is_none());
}

#[test]
fn test_corrupt_cache_entry_is_error() {
    let harness = Harness::new();
    let store = harness.store();
    store.ensure_folder().unwrap();
    let location = store.location("bad").unwrap();
    std::fs::write(&location.path, "{\"schema_id\": \"someone-else@9\"}").unwrap();

    let job = harness.job("hostname\n", "bad");
    assert!(job.submit(options("bad")).is_err());
    assert_eq!(harness.cluster.submit_count(), 0);
}

// =============================================================================
// Store management
// =============================================================================

#[test]
fn test_list_and_clear() {
    let harness = Harness::new();
    let job = harness.job("hostname\n", "many");
    for id in ["b", "a", "c"] {
        job.submit(options(id)).unwrap();
    }

    let store = harness.store();
    assert_eq!(store.list().unwrap(), vec!["a", "b", "c"]);
    assert!(store.remove("b").unwrap());
    assert_eq!(store.list().unwrap(), vec!["a", "c"]);
    assert_eq!(store.clear().unwrap(), 2);
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn test_automatic_cache_ids_are_distinct() {
    let harness = Harness::new();
    let job = harness.job("hostname\n", "auto");

    let a = job.submit(SubmitOptions::default()).unwrap();
    let b = job.submit(SubmitOptions::default()).unwrap();

    assert_eq!(harness.cluster.submit_count(), 2);
    assert_ne!(a.cache_file(), b.cache_file());
    assert_eq!(harness.store().list().unwrap().len(), 2);
}

#[test]
fn test_caching_disabled() {
    let harness = Harness::new();
    let mut defaults = harness.defaults();
    defaults.attributes.cache_folder = None;
    let env = harness.environment_with(defaults);
    let job = clusterjob::JobSpec::new("hostname\n", "nocache", &env).unwrap();

    let record = job.submit(options("x")).unwrap();
    assert!(record.cache_file().is_none());
    job.submit(options("x")).unwrap();
    assert_eq!(harness.cluster.submit_count(), 2);
    assert!(!harness.cache_dir().exists());
}
