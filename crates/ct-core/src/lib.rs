//! ct-core - Core library for clustertest
//!
//! This crate provides the shared types used across the harness crates:
//! configuration parsing, declarative assertion and fixture definitions,
//! strongly-typed names, and ClickHouse SQL quoting helpers.

pub mod assertion;
pub mod config;
pub mod error;
pub mod fixture;
mod newtype_string;
pub mod object_kind;
pub(crate) mod serde_helpers;
pub mod sql_utils;
pub mod table_name;

pub use assertion::{Assertion, AssertionFile, CheckOperator, ExpectedRow, TypedCheck};
pub use config::HarnessConfig;
pub use error::{CoreError, CoreResult};
pub use fixture::FixtureSet;
pub use object_kind::ObjectKind;
pub use table_name::{ClusterName, DatabaseName, TableName};
