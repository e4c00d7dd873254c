//! Minimal Trino client speaking the REST statement protocol.
//!
//! A statement is submitted with `POST /v1/statement`; the server answers with a
//! page that may carry columns, a batch of rows, running stats and a `nextUri`.
//! The client keeps following `nextUri` until it disappears, which marks the
//! query as finished (successfully or with an `error`).

use crate::config::SourceConfig;
use crate::schema::introspect;
use crate::schema::models::{Relationship, SchemaColumn};
use crate::sources::models::{QueryOutput, QueryTimings, SourceKind, TrinoAuth, string_pairs};
use crate::sources::traits::SqlBackend;
use crate::store::models::ConnectionRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

const SOURCE_HEADER: &str = "querycraft";

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TrinoColumn {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrinoStats {
    #[serde(default)]
    pub cpu_time_millis: Option<i64>,
    #[serde(default)]
    pub wall_time_millis: Option<i64>,
    #[serde(default)]
    pub queued_time_millis: Option<i64>,
    #[serde(default)]
    pub elapsed_time_millis: Option<i64>,
    #[serde(default)]
    pub processed_rows: Option<i64>,
    #[serde(default)]
    pub processed_bytes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrinoError {
    pub message: String,
    #[serde(default)]
    pub error_name: Option<String>,
}

/// One response of the statement protocol.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrinoPage {
    #[serde(default)]
    pub next_uri: Option<String>,
    #[serde(default)]
    pub columns: Option<Vec<TrinoColumn>>,
    #[serde(default)]
    pub data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    pub stats: Option<TrinoStats>,
    #[serde(default)]
    pub error: Option<TrinoError>,
}

fn millis_to_secs(ms: Option<i64>) -> Option<f64> {
    ms.map(|v| v as f64 / 1000.0)
}

impl From<&TrinoStats> for QueryTimings {
    fn from(s: &TrinoStats) -> Self {
        QueryTimings {
            cpu_time: millis_to_secs(s.cpu_time_millis),
            elapsed_time: millis_to_secs(s.elapsed_time_millis),
            wall_time: millis_to_secs(s.wall_time_millis),
            queued_time: millis_to_secs(s.queued_time_millis),
            processed_rows: s.processed_rows,
            processed_bytes: s.processed_bytes,
        }
    }
}

/// Folds protocol pages into a [`QueryOutput`].
#[derive(Debug, Default)]
pub(crate) struct PageAccumulator {
    columns: Vec<String>,
    rows: Vec<Value>,
    stats: Option<TrinoStats>,
}

impl PageAccumulator {
    /// Returns the page's `nextUri`, or an error if the page reports one.
    pub fn push(&mut self, page: TrinoPage) -> Result<Option<String>> {
        if let Some(err) = page.error {
            let name = err.error_name.unwrap_or_else(|| "QUERY_FAILED".to_string());
            return Err(Error::BackendMessage(format!("trino {name}: {}", err.message)));
        }
        if let Some(cols) = page.columns {
            if self.columns.is_empty() {
                self.columns = cols.into_iter().map(|c| c.name).collect();
            }
        }
        if let Some(data) = page.data {
            for row in data {
                let obj: serde_json::Map<String, Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.into_iter())
                    .collect();
                self.rows.push(Value::Object(obj));
            }
        }
        if page.stats.is_some() {
            self.stats = page.stats;
        }
        Ok(page.next_uri)
    }

    pub fn finish(self) -> QueryOutput {
        let timings = self
            .stats
            .as_ref()
            .map(QueryTimings::from)
            .unwrap_or_default();
        QueryOutput {
            row_count: self.rows.len(),
            columns: self.columns,
            rows: self.rows,
            timings,
        }
    }
}

#[derive(Clone)]
pub struct TrinoClient {
    http: reqwest::Client,
    server: String,
    catalog: String,
    schema: String,
    user: String,
    password: Option<String>,
    headers: Vec<(String, String)>,
}

impl std::fmt::Debug for TrinoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrinoClient")
            .field("server", &self.server)
            .field("catalog", &self.catalog)
            .field("schema", &self.schema)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl TrinoClient {
    /// Builds a client from a stored connection.
    ///
    /// The user comes from the auth blob, then an `X-Trino-User` extra header,
    /// then the configured default. Session properties and extra credentials
    /// are forwarded as `X-Trino-Session` / `X-Trino-Extra-Credential`.
    pub fn from_connection(
        http: reqwest::Client,
        connection: &ConnectionRecord,
        cfg: &SourceConfig,
    ) -> Result<Self> {
        if connection.server.trim().is_empty() {
            return Err(Error::InvalidInput("trino server is empty".to_string()));
        }
        let auth = TrinoAuth::from_blob(&connection.auth)?;
        let mut headers = Vec::new();
        let mut header_user = None;
        for (k, v) in string_pairs(&connection.extra_headers) {
            if k.eq_ignore_ascii_case("x-trino-user") {
                header_user = Some(v);
            } else {
                headers.push((k, v));
            }
        }
        for (k, v) in string_pairs(&connection.session) {
            headers.push(("X-Trino-Session".to_string(), format!("{k}={v}")));
        }
        for (k, v) in string_pairs(&connection.extra_credential) {
            headers.push(("X-Trino-Extra-Credential".to_string(), format!("{k}={v}")));
        }
        let user = auth
            .user
            .filter(|u| !u.trim().is_empty())
            .or(header_user)
            .unwrap_or_else(|| cfg.trino_user.clone());

        Ok(Self {
            http,
            server: connection.server.trim_end_matches('/').to_string(),
            catalog: connection.catalog.clone(),
            schema: connection.schema.clone(),
            user,
            password: auth.password.filter(|p| !p.is_empty()),
            headers,
        })
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    fn decorate(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req = req
            .header("X-Trino-User", &self.user)
            .header("X-Trino-Source", SOURCE_HEADER);
        if !self.catalog.is_empty() {
            req = req.header("X-Trino-Catalog", &self.catalog);
        }
        if !self.schema.is_empty() {
            req = req.header("X-Trino-Schema", &self.schema);
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(pw) = &self.password {
            req = req.basic_auth(&self.user, Some(pw));
        }
        req
    }

    async fn read_page(response: reqwest::Response) -> Result<TrinoPage> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::BackendMessage(format!(
                "trino request failed ({status}): {body}"
            )));
        }
        response
            .json::<TrinoPage>()
            .await
            .map_err(|e| Error::backend("trino page decode", e))
    }

    #[tracing::instrument(level = "debug", skip(self, sql), fields(server = %self.server))]
    pub async fn execute(&self, sql: &str) -> Result<QueryOutput> {
        let url = format!("{}/v1/statement", self.server);
        let response = self
            .decorate(self.http.post(url))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(sql.to_string())
            .send()
            .await
            .map_err(Error::backend_reqwest)?;

        let mut acc = PageAccumulator::default();
        let mut next = acc.push(Self::read_page(response).await?)?;
        let mut pages = 1usize;
        while let Some(uri) = next {
            let response = self
                .decorate(self.http.get(uri))
                .send()
                .await
                .map_err(Error::backend_reqwest)?;
            next = acc.push(Self::read_page(response).await?)?;
            pages += 1;
        }
        let out = acc.finish();
        tracing::debug!(pages, rows = out.row_count, "trino statement finished");
        Ok(out)
    }
}

#[async_trait]
impl SqlBackend for TrinoClient {
    fn kind(&self) -> SourceKind {
        SourceKind::Trino
    }

    async fn query(&self, sql: &str) -> Result<QueryOutput> {
        self.execute(sql).await
    }

    async fn ping(&self) -> Result<()> {
        self.execute("SELECT 1 AS success").await.map(|_| ())
    }

    async fn fetch_schema(&self) -> Result<Vec<SchemaColumn>> {
        let sql = introspect::tables_query(Some(&self.catalog))?;
        let out = self.execute(&sql).await?;
        Ok(introspect::flatten_schema_rows(&out.rows))
    }

    async fn fetch_relationships(&self) -> Result<Vec<Relationship>> {
        let sql = introspect::relationships_query(Some(&self.catalog))?;
        let out = self.execute(&sql).await?;
        Ok(introspect::flatten_relationship_rows(&out.rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn page(v: Value) -> TrinoPage {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn pages_fold_into_rows_and_timings() {
        let mut acc = PageAccumulator::default();
        let next = acc
            .push(page(json!({
                "id": "q1",
                "nextUri": "http://trino/v1/statement/q1/1",
                "stats": {"state": "QUEUED", "queuedTimeMillis": 5}
            })))
            .unwrap();
        assert_eq!(next.as_deref(), Some("http://trino/v1/statement/q1/1"));

        acc.push(page(json!({
            "columns": [{"name": "id", "type": "integer"}, {"name": "name", "type": "varchar"}],
            "data": [[1, "a"], [2, "b"]],
            "nextUri": "http://trino/v1/statement/q1/2"
        })))
        .unwrap();
        let next = acc
            .push(page(json!({
                "columns": [{"name": "id", "type": "integer"}, {"name": "name", "type": "varchar"}],
                "data": [[3, "c"]],
                "stats": {
                    "state": "FINISHED",
                    "cpuTimeMillis": 1500,
                    "wallTimeMillis": 2000,
                    "queuedTimeMillis": 10,
                    "elapsedTimeMillis": 2500,
                    "processedRows": 3,
                    "processedBytes": 128
                }
            })))
            .unwrap();
        assert!(next.is_none());

        let out = acc.finish();
        assert_eq!(out.columns, vec!["id", "name"]);
        assert_eq!(out.row_count, 3);
        assert_eq!(out.rows[2], json!({"id": 3, "name": "c"}));
        assert_eq!(out.timings.cpu_time, Some(1.5));
        assert_eq!(out.timings.elapsed_time, Some(2.5));
        assert_eq!(out.timings.queued_time, Some(0.01));
        assert_eq!(out.timings.processed_bytes, Some(128));
    }

    #[test]
    fn error_page_fails_the_query() {
        let mut acc = PageAccumulator::default();
        let err = acc
            .push(page(json!({
                "error": {"message": "line 1:8: Column 'x' cannot be resolved", "errorName": "COLUMN_NOT_FOUND"}
            })))
            .unwrap_err();
        assert!(err.to_string().contains("COLUMN_NOT_FOUND"));
    }

    #[test]
    fn user_falls_back_through_auth_header_and_default() {
        let now = Utc::now();
        let mut conn = ConnectionRecord {
            id: crate::ConnectionId::new(),
            name: None,
            project_id: crate::ProjectId::new(),
            server: "http://trino:8080/".to_string(),
            catalog: "hive".to_string(),
            schema: "web".to_string(),
            source: SourceKind::Trino,
            auth: Value::Null,
            extra_headers: json!({}),
            ssl: json!({}),
            extra_credential: json!({}),
            session: json!({"query_max_run_time": "10m"}),
            created_at: now,
            updated_at: now,
        };
        let cfg = crate::config::AppConfig::for_tests().sources;
        let http = reqwest::Client::new();

        let client = TrinoClient::from_connection(http.clone(), &conn, &cfg).unwrap();
        assert_eq!(client.user, "trino_user");
        assert_eq!(client.server, "http://trino:8080");
        assert!(
            client
                .headers
                .contains(&("X-Trino-Session".to_string(), "query_max_run_time=10m".to_string()))
        );

        conn.extra_headers = json!({"X-Trino-User": "etl"});
        let client = TrinoClient::from_connection(http.clone(), &conn, &cfg).unwrap();
        assert_eq!(client.user, "etl");

        conn.auth = json!({"user": "alice", "password": "pw"});
        let client = TrinoClient::from_connection(http, &conn, &cfg).unwrap();
        assert_eq!(client.user, "alice");
        assert_eq!(client.password.as_deref(), Some("pw"));
    }
}
