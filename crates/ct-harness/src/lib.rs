//! ct-harness - Dual-cluster test database lifecycle
//!
//! The [`DatabaseManager`] prepares the shared source cluster once per suite,
//! loads parquet fixtures into it with the [`BulkLoader`], and creates and
//! drops one ephemeral derived database per test case.

pub mod error;
pub mod loader;
pub mod manager;
pub mod naming;

pub use error::{HarnessError, HarnessResult};
pub use loader::BulkLoader;
pub use manager::{DatabaseManager, PrepareOutcome, CLEARED_DATABASES, SOURCE_DATABASES};
pub use naming::generate_name;
