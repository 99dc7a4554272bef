//! ClickHouse implementation of the Database trait over the HTTP interface

use crate::error::{DbError, DbResult};
use crate::traits::{Database, Session};
use crate::types::{Column, Datum, QueryResult, Statement};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default HTTP interface port
pub const DEFAULT_HTTP_PORT: u16 = 8123;

/// Default HTTPS interface port
pub const DEFAULT_HTTPS_PORT: u16 = 8443;

const USER_HEADER: &str = "X-ClickHouse-User";
const KEY_HEADER: &str = "X-ClickHouse-Key";

/// Pool options
#[derive(Debug, Clone)]
pub struct ClickHouseOptions {
    /// Maximum sessions checked out at once
    pub max_sessions: usize,

    /// Idle lifetime of a server-side session
    pub session_timeout: Duration,

    /// TCP connect timeout of the HTTP client
    pub connect_timeout: Duration,
}

impl Default for ClickHouseOptions {
    fn default() -> Self {
        Self {
            max_sessions: 16,
            session_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection target parsed from a DSN
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    url: Url,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
}

impl Endpoint {
    /// Parse `http://`, `https://` or `clickhouse://` DSNs.
    ///
    /// `clickhouse://` is served over plain HTTP. Credentials come from the
    /// userinfo part and the database from the path or a `database` parameter.
    fn parse(dsn: &str) -> DbResult<Self> {
        let normalized = match dsn.split_once("://") {
            Some(("clickhouse", rest)) => format!("http://{rest}"),
            Some(("http", _)) | Some(("https", _)) => dsn.to_string(),
            Some((scheme, _)) => {
                return Err(DbError::InvalidDsn(format!(
                    "unsupported scheme '{scheme}' in {}",
                    redact(dsn)
                )))
            }
            None => return Err(DbError::InvalidDsn(format!("missing scheme in {}", redact(dsn)))),
        };

        let parsed = Url::parse(&normalized)
            .map_err(|e| DbError::InvalidDsn(format!("{}: {e}", redact(dsn))))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| DbError::InvalidDsn(format!("missing host in {}", redact(dsn))))?;

        let user = Some(parsed.username())
            .filter(|u| !u.is_empty())
            .map(decode_component);
        let password = parsed.password().map(decode_component);
        let database = parsed
            .query_pairs()
            .find(|(k, _)| k == "database")
            .map(|(_, v)| v.into_owned())
            .or_else(|| {
                Some(parsed.path().trim_matches('/'))
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
            });

        let port = parsed.port().unwrap_or(match parsed.scheme() {
            "https" => DEFAULT_HTTPS_PORT,
            _ => DEFAULT_HTTP_PORT,
        });
        let url = Url::parse(&format!("{}://{}:{}/", parsed.scheme(), host, port))
            .map_err(|e| DbError::InvalidDsn(format!("{}: {e}", redact(dsn))))?;

        Ok(Self {
            url,
            user,
            password,
            database,
        })
    }
}

fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(b) = decoded {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Hide the password of a DSN for error messages
fn redact(dsn: &str) -> String {
    let Some((scheme, rest)) = dsn.split_once("://") else {
        return dsn.to_string();
    };
    match rest.rsplit_once('@') {
        Some((userinfo, host)) if userinfo.contains(':') => {
            let user = userinfo.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        _ => dsn.to_string(),
    }
}

/// `JSONCompact` response body
#[derive(Debug, Deserialize)]
struct CompactBody {
    #[serde(default)]
    meta: Vec<Column>,
    #[serde(default)]
    data: Vec<Vec<serde_json::Value>>,
}

/// Whether a server type is delivered as a byte string
fn is_byte_string(type_name: &str) -> bool {
    let mut base = type_name.trim();
    loop {
        if let Some(inner) = base
            .strip_prefix("Nullable(")
            .or_else(|| base.strip_prefix("LowCardinality("))
        {
            base = inner.strip_suffix(')').unwrap_or(inner);
        } else {
            break;
        }
    }
    base == "String" || base.starts_with("FixedString(")
}

fn decode_compact(body: &str) -> DbResult<QueryResult> {
    if body.trim().is_empty() {
        return Ok(QueryResult::default());
    }

    let parsed: CompactBody =
        serde_json::from_str(body).map_err(|e| DbError::Decode(e.to_string()))?;
    let text_columns: Vec<bool> = parsed
        .meta
        .iter()
        .map(|c| is_byte_string(&c.type_name))
        .collect();

    let mut rows = Vec::with_capacity(parsed.data.len());
    for raw in parsed.data {
        if raw.len() != parsed.meta.len() {
            return Err(DbError::Decode(format!(
                "row has {} cells but {} columns were declared",
                raw.len(),
                parsed.meta.len()
            )));
        }
        let row = raw
            .into_iter()
            .zip(&text_columns)
            .map(|(value, &is_text)| match value {
                serde_json::Value::String(s) if is_text => Datum::Bytes(s.into_bytes()),
                other => Datum::Value(other),
            })
            .collect();
        rows.push(row);
    }

    Ok(QueryResult::new(parsed.meta, rows))
}

/// Abbreviate SQL for error messages
fn snippet(sql: &str) -> String {
    const MAX: usize = 200;
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MAX {
        flat
    } else {
        let cut: String = flat.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

struct Inner {
    client: reqwest::Client,
    endpoint: Endpoint,
    session_timeout: Duration,
    sessions: Arc<Semaphore>,
    closed: AtomicBool,
}

impl Inner {
    fn ensure_open(&self) -> DbResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(DbError::Closed)
        } else {
            Ok(())
        }
    }

    /// Query-string settings for one request; DateTime cells are returned
    /// as UTC ISO 8601
    fn query_params(&self, stmt: &Statement, session_id: Option<&str>) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("default_format".to_string(), "JSONCompact".to_string()),
            (
                "output_format_json_quote_64bit_integers".to_string(),
                "0".to_string(),
            ),
            ("date_time_output_format".to_string(), "iso".to_string()),
        ];
        if let Some(database) = &self.endpoint.database {
            params.push(("database".to_string(), database.clone()));
        }
        if let Some(id) = session_id {
            params.push(("session_id".to_string(), id.to_string()));
            params.push((
                "session_timeout".to_string(),
                self.session_timeout.as_secs().max(1).to_string(),
            ));
        }
        for (name, value) in stmt.params() {
            params.push((format!("param_{name}"), value.clone()));
        }
        params
    }

    async fn send(&self, stmt: &Statement, session_id: Option<&str>) -> DbResult<String> {
        self.ensure_open()?;

        let params = self.query_params(stmt, session_id);
        let mut request = self
            .client
            .post(self.endpoint.url.clone())
            .query(&params)
            .body(stmt.sql().to_string());
        if let Some(user) = &self.endpoint.user {
            request = request.header(USER_HEADER, user);
        }
        if let Some(password) = &self.endpoint.password {
            request = request.header(KEY_HEADER, password);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;

        if !status.is_success() {
            return Err(DbError::ExecutionError(format!(
                "{} (HTTP {}) in: {}",
                body.trim(),
                status.as_u16(),
                snippet(stmt.sql())
            )));
        }
        Ok(body)
    }
}

/// ClickHouse connection pool over HTTP.
///
/// Cloning shares the underlying client and session limit.
#[derive(Clone)]
pub struct ClickHouseBackend {
    inner: Arc<Inner>,
}

impl ClickHouseBackend {
    /// Create a pool for `dsn`. No request is made until first use.
    pub fn open(dsn: &str, options: ClickHouseOptions) -> DbResult<Self> {
        let endpoint = Endpoint::parse(dsn)?;
        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;

        log::debug!(
            "Opened ClickHouse pool for {} (max_sessions={})",
            endpoint.url,
            options.max_sessions
        );

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                endpoint,
                session_timeout: options.session_timeout,
                sessions: Arc::new(Semaphore::new(options.max_sessions.max(1))),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Sessions that can be acquired without waiting
    pub fn available_sessions(&self) -> usize {
        self.inner.sessions.available_permits()
    }
}

impl std::fmt::Debug for ClickHouseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseBackend")
            .field("url", &self.inner.endpoint.url.as_str())
            .field("user", &self.inner.endpoint.user)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl Database for ClickHouseBackend {
    async fn ping(&self) -> DbResult<()> {
        self.inner.ensure_open()?;
        let url = self
            .inner
            .endpoint
            .url
            .join("ping")
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;
        let response = self
            .inner
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DbError::ConnectionError(format!(
                "ping to {} returned HTTP {}",
                self.inner.endpoint.url,
                response.status().as_u16()
            )));
        }
        // Credentials are only checked on a real query
        self.inner.send(&Statement::new("SELECT 1"), None).await?;
        Ok(())
    }

    async fn execute(&self, stmt: Statement) -> DbResult<()> {
        self.inner.send(&stmt, None).await.map(|_| ())
    }

    async fn query(&self, stmt: Statement) -> DbResult<QueryResult> {
        let body = self.inner.send(&stmt, None).await?;
        decode_compact(&body)
    }

    async fn acquire(&self) -> DbResult<Box<dyn Session>> {
        self.inner.ensure_open()?;
        let permit = self
            .inner
            .sessions
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DbError::Closed)?;
        let id = uuid::Uuid::new_v4().to_string();
        log::debug!("Acquired session {}", id);
        Ok(Box::new(ClickHouseSession {
            inner: Arc::clone(&self.inner),
            id,
            _permit: permit,
        }))
    }

    async fn close(&self) -> DbResult<()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.sessions.close();
            log::debug!("Closed ClickHouse pool for {}", self.inner.endpoint.url);
        }
        Ok(())
    }

    fn db_type(&self) -> &'static str {
        "clickhouse"
    }
}

/// Session pinned through the HTTP `session_id` parameter
struct ClickHouseSession {
    inner: Arc<Inner>,
    id: String,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Session for ClickHouseSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&mut self, stmt: Statement) -> DbResult<()> {
        self.inner.send(&stmt, Some(&self.id)).await.map(|_| ())
    }

    async fn query(&mut self, stmt: Statement) -> DbResult<QueryResult> {
        let body = self.inner.send(&stmt, Some(&self.id)).await?;
        decode_compact(&body)
    }
}

#[cfg(test)]
#[path = "clickhouse_test.rs"]
mod tests;
