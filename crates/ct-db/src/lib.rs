//! ct-db - Database abstraction layer for clustertest
//!
//! This crate provides the [`Database`] pool trait, the [`Session`] trait for
//! work that depends on connection-local state (`USE <db>` followed by a
//! query), and a ClickHouse implementation over the HTTP interface.
//!
//! With the `test-support` feature a scripted in-process [`mock::MockDatabase`]
//! is available for exercising callers without a cluster.

pub mod clickhouse;
pub mod deadline;
pub mod error;
pub mod guard;
#[cfg(feature = "test-support")]
pub mod mock;
pub mod traits;
pub mod types;

pub use clickhouse::{ClickHouseBackend, ClickHouseOptions};
pub use deadline::{cancellable, with_deadline};
pub use error::{DbError, DbResult};
pub use guard::verify_safe_host;
pub use traits::{Database, Session};
pub use types::{Column, Datum, QueryResult, Statement};
