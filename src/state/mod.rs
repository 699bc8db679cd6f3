//! Submission state
//!
//! - `SubmissionRecord`: the status state machine of one submitted job
//!   (PENDING → RUNNING → {COMPLETED | CANCELLED | FAILED})
//! - `CacheStore`: one durable JSON entry per record, so a later process
//!   can resume polling instead of submitting again

mod cache;
mod submission;

pub use cache::{
    next_cache_id, CacheEntry, CacheError, CacheLocation, CacheStore, SCHEMA_ID, SCHEMA_VERSION,
};
pub use submission::{SubmissionError, SubmissionParts, SubmissionRecord};
