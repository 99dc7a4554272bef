//! Value comparison between expected and actual rows.
//!
//! Two values are equal when any of these hold, checked in order:
//! both string forms parse as timestamps denoting the same instant, both
//! are numbers (or numeric strings) of equal value, the string forms are
//! identical, or the values are structurally equal.
//!
//! Typed checks order timestamps by instant and numbers by value; other
//! values only support `equals` and `not_equals`, compared as strings.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use ct_core::{Assertion, CheckOperator, ExpectedRow, TypedCheck};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// First result row keyed by column name
pub type ActualRow = BTreeMap<String, Value>;

/// `%z` offset with optional fractional seconds
const OFFSET_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %z";

/// Zone-less wall-clock time, taken as UTC
const NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Text used for string comparison and diagnostics
pub fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a timestamp in one of the accepted forms:
///
/// - RFC 3339, with or without fractional seconds (`2024-06-01T12:00:00Z`)
/// - `2024-06-01 13:00:00 +0100 CET` (numeric offset plus zone abbreviation)
/// - `2024-06-01 13:00:00 +0100`
/// - `2024-06-01 12:00:00`, interpreted as UTC
///
/// ```
/// use ct_assert::parse_timestamp;
///
/// let a = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
/// let b = parse_timestamp("2024-01-01 01:00:00 +0100 CET").unwrap();
/// assert_eq!(a, b);
/// ```
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let parts: Vec<&str> = s.split_whitespace().collect();
    match parts.as_slice() {
        [date, time, offset, zone] if zone.chars().all(|c| c.is_ascii_alphabetic()) => {
            DateTime::parse_from_str(&format!("{date} {time} {offset}"), OFFSET_FORMAT)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        [_, _, _] => DateTime::parse_from_str(s, OFFSET_FORMAT)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        [_, _] => NaiveDateTime::parse_from_str(s, NAIVE_FORMAT)
            .ok()
            .map(|naive| naive.and_utc()),
        _ => None,
    }
}

enum Number {
    Int(i128),
    Float(f64),
}

impl Number {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(i128::from)
                .or_else(|| n.as_u64().map(i128::from))
                .map(Number::Int)
                .or_else(|| n.as_f64().map(Number::Float)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i128>().map(Number::Int).ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(Number::Float)
                })
            }
            _ => None,
        }
    }

    fn as_f64(&self) -> f64 {
        match *self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

/// Order two numbers or numeric strings by value; integers compare exactly
fn compare_numbers(left: &Value, right: &Value) -> Option<Ordering> {
    match (Number::of(left)?, Number::of(right)?) {
        (Number::Int(l), Number::Int(r)) => Some(l.cmp(&r)),
        (l, r) => l.as_f64().partial_cmp(&r.as_f64()),
    }
}

/// Semantic equality of an expected and an actual value
pub fn equal(expected: &Value, actual: &Value) -> bool {
    let expected_str = string_form(expected);
    let actual_str = string_form(actual);

    if let (Some(e), Some(a)) = (parse_timestamp(&expected_str), parse_timestamp(&actual_str)) {
        if e == a {
            return true;
        }
    }

    if compare_numbers(expected, actual) == Some(Ordering::Equal) {
        return true;
    }

    expected_str == actual_str || expected == actual
}

/// Evaluate `actual <operator> check.value`.
///
/// Errors when an ordering operator meets values that are neither both
/// timestamps nor both numbers.
pub fn evaluate_check(check: &TypedCheck, actual: &Value) -> Result<bool, String> {
    let ordering = match (
        parse_timestamp(&string_form(actual)),
        parse_timestamp(&string_form(&check.value)),
    ) {
        (Some(a), Some(e)) => Some(a.cmp(&e)),
        _ => compare_numbers(actual, &check.value),
    };

    let Some(ordering) = ordering else {
        return match check.operator {
            CheckOperator::Equals => Ok(string_form(actual) == string_form(&check.value)),
            CheckOperator::NotEquals => Ok(string_form(actual) != string_form(&check.value)),
            op => Err(format!(
                "{op} requires numeric or timestamp values, got {} and {}",
                display(actual),
                display(&check.value)
            )),
        };
    };

    Ok(match check.operator {
        CheckOperator::Equals => ordering == Ordering::Equal,
        CheckOperator::NotEquals => ordering != Ordering::Equal,
        CheckOperator::GreaterThan => ordering == Ordering::Greater,
        CheckOperator::GreaterThanOrEqual => ordering != Ordering::Less,
        CheckOperator::LessThan => ordering == Ordering::Less,
        CheckOperator::LessThanOrEqual => ordering != Ordering::Greater,
    })
}

/// Evaluate every typed check against the actual first row.
///
/// On failure, returns one line per failed or unevaluable check.
pub fn check_row(checks: &[TypedCheck], actual: &ActualRow) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();

    for check in checks {
        let column = &check.column;
        match actual.get(column) {
            None => problems.push(format!("column `{column}`: missing from result")),
            Some(got) => match evaluate_check(check, got) {
                Ok(true) => {}
                Ok(false) => problems.push(format!(
                    "column `{column}`: expected {} {}, got {}",
                    check.operator,
                    display(&check.value),
                    display(got)
                )),
                Err(reason) => problems.push(format!("column `{column}`: {reason}")),
            },
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

/// Evaluate an assertion's exact row or typed checks against the actual row
pub fn evaluate(assertion: &Assertion, actual: &ActualRow) -> Result<(), Vec<String>> {
    if assertion.expected.is_empty() {
        check_row(&assertion.assertions, actual)
    } else {
        compare_rows(&assertion.expected, actual)
    }
}

/// Render a value for diagnostics, normalizing timestamps to RFC 3339
fn display(value: &Value) -> String {
    let s = string_form(value);
    match parse_timestamp(&s) {
        Some(ts) => ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        None => s,
    }
}

/// Compare the expected row with the actual first row.
///
/// The column counts must match exactly and every expected column must be
/// present and [`equal`]. On failure, returns one line per problem.
pub fn compare_rows(expected: &ExpectedRow, actual: &ActualRow) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();

    if expected.len() != actual.len() {
        let extra: Vec<&str> = actual
            .keys()
            .filter(|k| !expected.contains_key(*k))
            .map(String::as_str)
            .collect();
        let mut line = format!(
            "expected {} column(s), got {}",
            expected.len(),
            actual.len()
        );
        if !extra.is_empty() {
            line.push_str(&format!(" (unexpected: {})", extra.join(", ")));
        }
        problems.push(line);
    }

    for (column, want) in expected {
        match actual.get(column) {
            None => problems.push(format!("column `{column}`: missing from result")),
            Some(got) if !equal(want, got) => problems.push(format!(
                "column `{column}`: expected {}, got {}",
                display(want),
                display(got)
            )),
            Some(_) => {}
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}
