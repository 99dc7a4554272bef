//! Assertion outcomes

use crate::compare::ActualRow;
use crate::error::AssertionError;
use ct_core::ExpectedRow;
use serde::Serialize;
use std::time::Duration;

/// Outcome of one assertion; results are only produced once it has run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertionStatus {
    /// Row matched or every check held
    Passed,
    /// Row did not match or a check failed
    Failed,
    /// No comparable row could be produced
    Errored,
}

impl std::fmt::Display for AssertionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Result of a single assertion
#[derive(Debug, Clone, Serialize)]
pub struct AssertionResult {
    /// Assertion name
    pub name: String,

    /// Terminal status
    pub status: AssertionStatus,

    /// Whether the assertion passed
    pub passed: bool,

    /// Wall time including retries
    pub duration: Duration,

    /// Cause when failed or errored
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<AssertionError>,

    /// Expected values
    pub expected: ExpectedRow,

    /// First row of the last attempt, empty if none was read
    pub actual: ActualRow,

    /// Query attempts made
    pub attempts: usize,
}

fn serialize_error<S>(error: &Option<AssertionError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl AssertionResult {
    /// Create a passed result
    pub fn pass(
        name: &str,
        expected: ExpectedRow,
        actual: ActualRow,
        duration: Duration,
        attempts: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            status: AssertionStatus::Passed,
            passed: true,
            duration,
            error: None,
            expected,
            actual,
            attempts,
        }
    }

    /// Create a failed result for a row that did not match
    pub fn fail(
        name: &str,
        expected: ExpectedRow,
        actual: ActualRow,
        problems: &[String],
        duration: Duration,
        attempts: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            status: AssertionStatus::Failed,
            passed: false,
            duration,
            error: Some(AssertionError::Mismatch(problems.join("; "))),
            expected,
            actual,
            attempts,
        }
    }

    /// Create an errored result
    pub fn error(
        name: &str,
        expected: ExpectedRow,
        error: AssertionError,
        duration: Duration,
        attempts: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            status: AssertionStatus::Errored,
            passed: false,
            duration,
            error: Some(error),
            expected,
            actual: ActualRow::new(),
            attempts,
        }
    }
}

/// Aggregate of one run, results in input order
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Database the assertions ran against
    pub database: String,

    /// Total assertions
    pub total: usize,

    /// Assertions that passed
    pub passed: usize,

    /// Assertions that failed or errored
    pub failed: usize,

    /// Wall time of the run, sync gate included
    pub duration: Duration,

    /// Per-assertion results
    pub results: Vec<AssertionResult>,
}

impl RunResult {
    /// Build a summary from ordered results
    pub fn from_results(database: &str, results: Vec<AssertionResult>, duration: Duration) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        Self {
            database: database.to_string(),
            total,
            passed,
            failed: total - passed,
            duration,
            results,
        }
    }

    /// Check if every assertion passed
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Results that did not pass
    pub fn failures(&self) -> impl Iterator<Item = &AssertionResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}
