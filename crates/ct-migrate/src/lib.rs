//! ct-migrate - Schema migrations for clustertest
//!
//! Applies ordered `<version>_<name>.up.sql` files into a named database and
//! records applied versions in a per-database state table kept in `default`.

pub mod error;
pub mod runner;
pub mod source;
pub mod split;

pub use error::{MigrateError, MigrateResult};
pub use runner::{FileMigrationRunner, MigrationRunner};
pub use source::{Migration, MigrationSource};
pub use split::split_statements;
