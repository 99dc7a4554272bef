//! Declarative SQL assertions
//!
//! An assertion pairs a row-returning query with what its first row must
//! satisfy: either an exact `expected` row or a list of typed `assertions`
//! checks. Assertion files are YAML:
//!
//! ```yaml
//! assertions:
//!   - name: block count
//!     sql: SELECT count() AS c FROM {database}.fct_block
//!     expected:
//!       c: 42
//!   - name: recent head
//!     sql: SELECT max(slot) AS s, max(updated_at) AS t FROM fct_head
//!     assertions:
//!       - { column: s, type: greater_than, value: 1000 }
//!       - { column: t, type: gte, value: "2024-06-01T00:00:00Z" }
//! ```
//!
//! `query` is accepted as an alias of `sql`.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Expected row: column name to expected scalar.
pub type ExpectedRow = BTreeMap<String, serde_json::Value>;

/// Placeholder substituted with the target database name before execution.
pub const DATABASE_PLACEHOLDER: &str = "{database}";

/// Remote-cluster placeholder used by shared model SQL
pub const REMOTE_CLUSTER_PLACEHOLDER: &str = "{remote_cluster}";

/// `cluster()` table function wrapping a `default` table
const REMOTE_TABLE_PREFIX: &str = "cluster('{remote_cluster}', default.";

const DEFAULT_QUALIFIER: &str = "default.";

/// Comparison applied by a [`TypedCheck`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOperator {
    #[serde(alias = "equal")]
    Equals,
    #[serde(alias = "not_equal")]
    NotEquals,
    #[serde(alias = "gt")]
    GreaterThan,
    #[serde(alias = "gte")]
    GreaterThanOrEqual,
    #[serde(alias = "lt")]
    LessThan,
    #[serde(alias = "lte")]
    LessThanOrEqual,
}

impl CheckOperator {
    /// Whether the operator orders values rather than testing equality
    pub fn is_ordering(self) -> bool {
        !matches!(self, Self::Equals | Self::NotEquals)
    }
}

impl std::fmt::Display for CheckOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::GreaterThanOrEqual => "greater_than_or_equal",
            Self::LessThan => "less_than",
            Self::LessThanOrEqual => "less_than_or_equal",
        };
        f.write_str(s)
    }
}

/// One `column <operator> value` check against the first row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypedCheck {
    /// Result column to inspect
    pub column: String,

    /// Comparison to apply
    #[serde(rename = "type")]
    pub operator: CheckOperator,

    /// Right-hand side of the comparison
    pub value: serde_json::Value,
}

impl TypedCheck {
    pub fn new(
        column: impl Into<String>,
        operator: CheckOperator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }
}

/// A named query with the row or checks its first row must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Assertion {
    /// Assertion name, unique within a file
    pub name: String,

    /// Row-returning query; only the first row is inspected
    #[serde(alias = "query")]
    pub sql: String,

    /// Exact column values of the first row
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expected: ExpectedRow,

    /// Typed checks, used instead of `expected`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<TypedCheck>,
}

impl Assertion {
    /// Create an exact-match assertion from its parts
    pub fn new(name: impl Into<String>, sql: impl Into<String>, expected: ExpectedRow) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            expected,
            assertions: Vec::new(),
        }
    }

    /// Create an assertion evaluated by typed checks
    pub fn with_checks(
        name: impl Into<String>,
        sql: impl Into<String>,
        checks: Vec<TypedCheck>,
    ) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            expected: ExpectedRow::new(),
            assertions: checks,
        }
    }

    /// The query as run inside `USE <database>`.
    ///
    /// Rewrites, in order:
    ///
    /// - `{database}` becomes `database`
    /// - `cluster('{remote_cluster}', default.X)` becomes `X`
    /// - any other `{remote_cluster}` becomes `database`
    /// - a `default.` qualifier at a word boundary is removed
    pub fn render_sql(&self, database: &str) -> String {
        let mut sql = self.sql.replace(DATABASE_PLACEHOLDER, database);

        while let Some(start) = sql.find(REMOTE_TABLE_PREFIX) {
            let table_start = start + REMOTE_TABLE_PREFIX.len();
            let Some(len) = sql[table_start..].find(')') else {
                break;
            };
            let table_end = table_start + len;
            sql = format!(
                "{}{}{}",
                &sql[..start],
                &sql[table_start..table_end],
                &sql[table_end + 1..]
            );
        }

        strip_default_qualifier(&sql.replace(REMOTE_CLUSTER_PLACEHOLDER, database))
    }

    fn invalid(&self, reason: impl Into<String>) -> CoreError {
        CoreError::InvalidAssertion {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name cannot be empty"));
        }
        if self.sql.trim().is_empty() {
            return Err(self.invalid("sql cannot be empty"));
        }
        match (self.expected.is_empty(), self.assertions.is_empty()) {
            (true, true) => {
                return Err(self.invalid("expected or assertions must name at least one column"))
            }
            (false, false) => {
                return Err(self.invalid("expected and assertions are mutually exclusive"))
            }
            _ => {}
        }
        for (i, check) in self.assertions.iter().enumerate() {
            if check.column.trim().is_empty() {
                return Err(self.invalid(format!("check {i} is missing a column")));
            }
            if check.value.is_null() {
                return Err(self.invalid(format!("check {i} on `{}` is missing a value", check.column)));
            }
        }
        Ok(())
    }
}

/// Remove `default.` where it qualifies a name, leaving `xdefault.` intact
fn strip_default_qualifier(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find(DEFAULT_QUALIFIER) {
        out.push_str(&rest[..pos]);
        let qualifies = out
            .chars()
            .next_back()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
        if !qualifies {
            out.push_str(DEFAULT_QUALIFIER);
        }
        rest = &rest[pos + DEFAULT_QUALIFIER.len()..];
    }
    out.push_str(rest);
    out
}

/// A file of assertions run against one derived database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertionFile {
    /// Assertions in declaration order
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

impl AssertionFile {
    /// Parse and validate assertions from YAML text
    pub fn from_yaml(content: &str) -> CoreResult<Self> {
        let file: AssertionFile = serde_yaml::from_str(content)?;
        file.validate()?;
        Ok(file)
    }

    /// Load assertions from a YAML file
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    fn validate(&self) -> CoreResult<()> {
        let mut seen = HashSet::new();
        for assertion in &self.assertions {
            assertion.validate()?;
            if !seen.insert(assertion.name.as_str()) {
                return Err(CoreError::InvalidAssertion {
                    name: assertion.name.clone(),
                    reason: "duplicate assertion name".to_string(),
                });
            }
        }
        Ok(())
    }
}
