//! ct-assert - Assertion execution for clustertest
//!
//! Waits for the derived cluster's replication queue to drain, then runs
//! declarative single-row assertions in parallel on pinned sessions and
//! checks the first row against the expected values or typed checks.

pub mod compare;
pub mod error;
pub mod result;
pub mod runner;
pub mod sync;

pub use compare::{
    check_row, compare_rows, equal, evaluate, evaluate_check, parse_timestamp, ActualRow,
};
pub use error::{AssertError, AssertResult, AssertionError};
pub use result::{AssertionResult, AssertionStatus, RunResult};
pub use runner::{AssertionRunner, RunnerOptions};
pub use sync::SyncGate;
