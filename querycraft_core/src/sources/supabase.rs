use crate::schema::introspect;
use crate::schema::models::{Relationship, SchemaColumn};
use crate::sources::models::{QueryOutput, QueryTimings, SourceKind, SupabaseAuth};
use crate::sources::traits::SqlBackend;
use crate::store::models::ConnectionRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Value, json};

/// Supabase over its REST gateway. Statements are posted as `{"query": sql}`;
/// schema comes from the project's `get_schema_info` RPC.
#[derive(Clone)]
pub struct SupabaseSource {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl std::fmt::Debug for SupabaseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseSource")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl SupabaseSource {
    pub fn from_connection(http: reqwest::Client, connection: &ConnectionRecord) -> Result<Self> {
        let auth = SupabaseAuth::from_blob(&connection.auth)?;
        Ok(Self {
            http,
            url: auth.url.trim_end_matches('/').to_string(),
            api_key: auth.api_key,
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .authed(self.http.post(format!("{}/rest/v1/{path}", self.url)))
            .json(body)
            .send()
            .await
            .map_err(Error::backend_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::BackendMessage(format!(
                "Supabase query failed: {status}"
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| Error::backend("supabase response decode", e))
    }
}

/// Shapes a REST response into rows; anything but an array yields no rows.
pub(crate) fn output_from_response(body: Value) -> QueryOutput {
    let rows = match body {
        Value::Array(rows) => rows,
        _ => Vec::new(),
    };
    let columns = rows
        .first()
        .and_then(Value::as_object)
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default();
    QueryOutput {
        row_count: rows.len(),
        columns,
        rows,
        timings: QueryTimings::default(),
    }
}

#[async_trait]
impl SqlBackend for SupabaseSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Supabase
    }

    #[tracing::instrument(level = "debug", skip(self, sql), fields(url = %self.url))]
    async fn query(&self, sql: &str) -> Result<QueryOutput> {
        let body = self.post_json("", &json!({ "query": sql })).await?;
        Ok(output_from_response(body))
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .authed(self.http.get(format!("{}/rest/v1/", self.url)))
            .send()
            .await
            .map_err(Error::backend_reqwest)?;
        if !response.status().is_success() {
            return Err(Error::BackendMessage(format!(
                "Supabase ping failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn fetch_schema(&self) -> Result<Vec<SchemaColumn>> {
        let body = self.post_json("rpc/get_schema_info", &json!({})).await?;
        let rows = match body {
            Value::Array(rows) => rows,
            other => vec![other],
        };
        Ok(introspect::flatten_schema_rows(&rows))
    }

    async fn fetch_relationships(&self) -> Result<Vec<Relationship>> {
        let body = self
            .post_json(
                "",
                &json!({ "query": introspect::relationships_query(None)? }),
            )
            .await?;
        Ok(introspect::flatten_relationship_rows(
            &output_from_response(body).rows,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_responses_become_rows() {
        let out = output_from_response(json!([{"id": 1, "email": "a@b.c"}, {"id": 2, "email": null}]));
        assert_eq!(out.row_count, 2);
        assert!(out.columns.contains(&"email".to_string()));

        let out = output_from_response(json!({"message": "ok"}));
        assert_eq!(out.row_count, 0);
        assert!(out.columns.is_empty());
    }
}
