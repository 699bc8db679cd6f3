//! Shared job status vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a submitted job.
///
/// The variants are totally ordered:
/// `Pending < Running < Completed < Cancelled < Failed`.
/// A job has left the active state iff its status is `>= Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// Queued, held or suspended
    Pending,
    /// Executing (or completing)
    Running,
    /// Finished successfully
    Completed,
    /// Cancelled by the user or administrator
    Cancelled,
    /// Finished with an error
    Failed,
}

impl StatusCode {
    /// All status codes in ascending order
    pub const ALL: [StatusCode; 5] = [
        StatusCode::Pending,
        StatusCode::Running,
        StatusCode::Completed,
        StatusCode::Cancelled,
        StatusCode::Failed,
    ];

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            StatusCode::Pending => "PENDING",
            StatusCode::Running => "RUNNING",
            StatusCode::Completed => "COMPLETED",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Failed => "FAILED",
        }
    }

    /// True once the job has left the active state.
    pub fn is_finished(&self) -> bool {
        *self >= StatusCode::Completed
    }

    /// True for the unsuccessful terminal values.
    pub fn is_unsuccessful(&self) -> bool {
        *self > StatusCode::Completed
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Error for an unrecognised status name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown status code: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for StatusCode {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusCode::ALL
            .iter()
            .copied()
            .find(|code| code.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
