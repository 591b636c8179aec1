//! The durable run-result document and its building blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medra_vcs::CiStatus;

use crate::fix::Fix;

/// A single test result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Fully-qualified test name
    pub name: String,
    pub passed: bool,
    /// Source file the failing assertion points at, when recoverable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<String>,
}

/// Per-iteration bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration index
    pub index: u32,
    pub defects_before: usize,
    pub defects_after: usize,
    pub fixes_attempted: usize,
    pub fixes_successful: usize,
    pub duration_secs: f64,
    /// Defect signatures eliminated in this iteration
    pub fixed_signatures: Vec<String>,
    /// Signatures still outstanding afterwards
    pub remaining_signatures: Vec<String>,
}

/// Functional outcome of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStatus {
    AllResolved,
    PartiallyResolved,
    Unresolved,
}

/// Operational outcome of the run. Orthogonal to `ResolutionStatus`: a run
/// can complete operationally and still leave defects unresolved.
///
/// Serializes as a bare string: `completed`, `cancelled`, or
/// `error:<reason>`, so the serde impls are written by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
    Error(String),
}

impl RunStatus {
    pub fn error(reason: &str) -> Self {
        RunStatus::Error(format!("error:{reason}"))
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Error(reason) => reason,
        }
    }
}

impl Serialize for RunStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RunStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(match value.as_str() {
            "completed" => RunStatus::Completed,
            "cancelled" => RunStatus::Cancelled,
            _ => RunStatus::Error(value),
        })
    }
}

/// Aggregate summary nested inside the result document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_iterations: u32,
    pub initial_errors: usize,
    pub final_errors: usize,
    pub resolution_status: ResolutionStatus,
    pub iterations: Vec<IterationRecord>,
}

/// A test file generated for a previously untested source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTest {
    pub file_path: String,
    pub source_file: String,
}

/// The durable output of one run. One JSON document per run id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub branch_name: String,
    pub total_failures_detected: usize,
    pub total_fixes_applied: usize,
    /// Wall-clock seconds
    pub total_time_taken: f64,
    pub fixes: Vec<Fix>,
    pub test_results: Vec<TestOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_tests: Option<Vec<GeneratedTest>>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: RunStatus,
    pub summary: RunSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci_status: Option<CiStatus>,
    pub merged: bool,
    pub score: u8,
}
