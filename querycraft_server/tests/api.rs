use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use querycraft_core::ai::llm::TextGenerator;
use querycraft_core::config::AppConfig;
use querycraft_core::schema::models::{Relationship, SchemaColumn};
use querycraft_core::store::models::ConnectionRecord;
use querycraft_core::store::{InMemoryAppDb, InMemoryCache};
use querycraft_core::{
    BackendFactory, Cache, QueryOutput, QueryTimings, SourceKind, SqlBackend,
};
use querycraft_server::server::{AppState, router};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

struct FixedLlm;

#[async_trait]
impl TextGenerator for FixedLlm {
    async fn generate(&self, _parts: &[String]) -> querycraft_core::Result<String> {
        Ok("```sql\nSELECT id\n  FROM hive.web.users\n```".to_string())
    }
}

struct StubBackend;

#[async_trait]
impl SqlBackend for StubBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Trino
    }

    async fn query(&self, sql: &str) -> querycraft_core::Result<QueryOutput> {
        if sql.contains("missing_table") {
            return Err(querycraft_core::Error::BackendMessage(
                "Table 'hive.web.missing_table' does not exist".to_string(),
            ));
        }
        Ok(QueryOutput {
            columns: vec!["id".to_string()],
            rows: vec![json!({"id": 1}), json!({"id": 2})],
            row_count: 2,
            timings: QueryTimings::default(),
        })
    }

    async fn ping(&self) -> querycraft_core::Result<()> {
        Ok(())
    }

    async fn fetch_schema(&self) -> querycraft_core::Result<Vec<SchemaColumn>> {
        Ok(vec![
            SchemaColumn {
                table_schema: "web".to_string(),
                table_name: "users".to_string(),
                column_name: "id".to_string(),
                data_type: "bigint".to_string(),
            },
            SchemaColumn {
                table_schema: "web".to_string(),
                table_name: "users".to_string(),
                column_name: "email".to_string(),
                data_type: "varchar".to_string(),
            },
        ])
    }

    async fn fetch_relationships(&self) -> querycraft_core::Result<Vec<Relationship>> {
        Ok(Vec::new())
    }
}

struct StubFactory;

impl BackendFactory for StubFactory {
    fn open(&self, _connection: &ConnectionRecord) -> querycraft_core::Result<Box<dyn SqlBackend>> {
        Ok(Box::new(StubBackend))
    }
}

struct TestApp {
    app: Router,
    cache: Arc<InMemoryCache>,
}

fn test_app() -> TestApp {
    let cache = Arc::new(InMemoryCache::new());
    let state = AppState::new(
        AppConfig::for_tests(),
        Arc::new(InMemoryAppDb::new()),
        cache.clone(),
        Arc::new(FixedLlm),
        Arc::new(StubFactory),
    );
    TestApp {
        app: router(state),
        cache,
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Registers an admin and creates a project with one Trino connection.
/// Returns (token, organization id, project id, connection id).
async fn seed(app: &Router, email: &str) -> (String, String, String, String) {
    let (status, body) = send(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "name": "Ada",
            "email": email,
            "password": "correct horse",
            "organizationName": "Acme",
            "organizationEmail": "ops@acme.test"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let token = body["token"].as_str().unwrap().to_string();
    let org_id = body["organization"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        app,
        "POST",
        "/api/projects",
        Some(&token),
        Some(json!({
            "name": "analytics",
            "description": "web analytics",
            "organizationId": org_id,
            "connectionType": "trino",
            "connectionDetails": {
                "name": "warehouse",
                "server": "http://trino:8080",
                "catalog": "hive",
                "schema": "web"
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let project_id = body["project"]["id"].as_str().unwrap().to_string();
    let connection_id = body["connection"]["id"].as_str().unwrap().to_string();
    (token, org_id, project_id, connection_id)
}

#[tokio::test]
async fn health_is_public() {
    let t = test_app();
    let (status, body) = send(&t.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn protected_routes_require_bearer_token() {
    let t = test_app();
    let (status, body) = send(&t.app, "GET", "/api/auth/profile", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap().starts_with("Not authorized"));

    let (status, _) = send(&t.app, "GET", "/api/auth/profile", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_token_authorizes_profile() {
    let t = test_app();
    let (token, org_id, project_id, _) = seed(&t.app, "ada@acme.test").await;

    let (status, body) = send(&t.app, "GET", "/api/auth/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user"]["email"], "ada@acme.test");
    assert!(body["user"].get("passwordHash").is_none());
    assert_eq!(body["organization"]["id"], org_id.as_str());
    assert_eq!(body["membership"]["role"], "ADMIN");
    assert_eq!(body["projects"][0]["id"], project_id.as_str());
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let t = test_app();
    seed(&t.app, "ada@acme.test").await;
    let (status, body) = send(
        &t.app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({"email": "ADA@acme.test", "password": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "User already exists");
}

#[tokio::test]
async fn login_checks_password() {
    let t = test_app();
    seed(&t.app, "ada@acme.test").await;

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"email": "ada@acme.test", "password": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid email or password");

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"email": "ada@acme.test", "password": "correct horse"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].as_str().is_some());
}

#[tokio::test]
async fn generate_query_without_prompt_writes_no_history() {
    let t = test_app();
    let (token, _, project_id, connection_id) = seed(&t.app, "ada@acme.test").await;

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/ai/generate-query",
        Some(&token),
        Some(json!({"connectionId": connection_id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Prompt and connectionId are required");

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/queries/history/{project_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["executedQueries"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn generate_query_returns_sanitized_sql() {
    let t = test_app();
    let (token, _, project_id, connection_id) = seed(&t.app, "ada@acme.test").await;

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/ai/generate-query",
        Some(&token),
        Some(json!({"prompt": "all user ids", "connectionId": connection_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["query"], "SELECT id FROM hive.web.users");
    assert_eq!(body["connectionId"], connection_id.as_str());

    let (_, body) = send(
        &t.app,
        "GET",
        &format!("/api/queries/history/{project_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["executedQueries"][0]["status"], "GENERATED");
    assert_eq!(body["executedQueries"][0]["user"]["email"], "ada@acme.test");
}

#[tokio::test]
async fn cache_schema_stores_entry_under_connection_key() {
    let t = test_app();
    let (token, _, _, connection_id) = seed(&t.app, "ada@acme.test").await;

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/ai/cache-schema",
        Some(&token),
        Some(json!({"connectionId": connection_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["tableCount"], 2);
    assert_eq!(body["relationshipCount"], 0);

    let raw = t
        .cache
        .get(&format!("schema:{connection_id}"))
        .await
        .unwrap()
        .expect("cached entry");
    let entry: Value = serde_json::from_slice(&raw).unwrap();
    let tables = entry["tables"].as_array().unwrap();
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[1]["column_name"], "email");

    let (status, body) = send(
        &t.app,
        "DELETE",
        &format!("/api/ai/cache-schema/{connection_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invalidated"], true);
}

#[tokio::test]
async fn execute_reports_success_and_failure_with_audit_ids() {
    let t = test_app();
    let (token, _, project_id, connection_id) = seed(&t.app, "ada@acme.test").await;

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/queries/execute",
        Some(&token),
        Some(json!({"query": "SELECT id FROM hive.web.users", "connectionId": connection_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["rowCount"], 2);
    let executed_query_id = body["executedQueryId"].as_str().unwrap().to_string();

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/queries/execute",
        Some(&token),
        Some(json!({"query": "SELECT * FROM missing_table", "connectionId": connection_id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("does not exist"));
    assert!(body["executedQueryId"].as_str().is_some());

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/queries/feedback",
        Some(&token),
        Some(json!({"executedQueryId": executed_query_id, "rating": 5, "text": "fast"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["feedback"]["rawQuery"], "SELECT id FROM hive.web.users");

    let (_, body) = send(
        &t.app,
        "GET",
        &format!("/api/queries/history/{project_id}"),
        Some(&token),
        None,
    )
    .await;
    let queries = body["executedQueries"].as_array().unwrap();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0]["status"], "ERROR");
    assert_eq!(queries[1]["feedbacks"][0]["rating"], 5);
}

#[tokio::test]
async fn viewer_cannot_run_mutating_sql() {
    let t = test_app();
    let (admin_token, org_id, _, connection_id) = seed(&t.app, "ada@acme.test").await;

    let (status, body) = send(
        &t.app,
        "POST",
        &format!("/api/organizations/{org_id}/invite"),
        Some(&admin_token),
        Some(json!({"email": "vic@acme.test", "name": "Vic", "role": "VIEWER"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let password = body["temporaryPassword"].as_str().unwrap().to_string();

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"email": "vic@acme.test", "password": password})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let viewer_token = body["token"].as_str().unwrap().to_string();

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/queries/execute",
        Some(&viewer_token),
        Some(json!({"query": "delete from hive.web.users", "connectionId": connection_id})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["message"].as_str().unwrap().starts_with("Viewers can only execute SELECT"));
    assert!(body["error"].as_str().unwrap().starts_with("forbidden: "));

    let (status, _) = send(
        &t.app,
        "POST",
        "/api/queries/execute",
        Some(&viewer_token),
        Some(json!({"query": "SELECT id FROM hive.web.users", "connectionId": connection_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn outsiders_get_403_on_ai_routes() {
    let t = test_app();
    let (_, _, _, connection_id) = seed(&t.app, "ada@acme.test").await;
    let (other_token, _, _, _) = seed(&t.app, "eve@evil.test").await;

    let (status, _) = send(
        &t.app,
        "POST",
        "/api/ai/generate-query",
        Some(&other_token),
        Some(json!({"prompt": "all users", "connectionId": connection_id})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn member_management_requires_admin() {
    let t = test_app();
    let (admin_token, org_id, _, _) = seed(&t.app, "ada@acme.test").await;

    let (_, body) = send(
        &t.app,
        "POST",
        &format!("/api/auth/organizations/{org_id}/invite"),
        Some(&admin_token),
        Some(json!({"email": "bob@acme.test", "role": "MEMBER"})),
    )
    .await;
    let bob_id = body["user"]["id"].as_str().unwrap().to_string();
    let password = body["temporaryPassword"].as_str().unwrap().to_string();
    let (_, body) = send(
        &t.app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({"email": "bob@acme.test", "password": password})),
    )
    .await;
    let bob_token = body["token"].as_str().unwrap().to_string();

    let (status, _) = send(
        &t.app,
        "PATCH",
        &format!("/api/organizations/{org_id}/members/{bob_id}"),
        Some(&bob_token),
        Some(json!({"role": "ADMIN"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &t.app,
        "PATCH",
        &format!("/api/organizations/{org_id}/members/{bob_id}"),
        Some(&admin_token),
        Some(json!({"role": "OWNER"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/organizations/{org_id}/members"),
        Some(&bob_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("/api/organizations/{org_id}/members/{bob_id}"),
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The removed user's token no longer authenticates.
    let (status, _) = send(&t.app, "GET", "/api/auth/profile", Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
