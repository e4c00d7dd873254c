use crate::models::{ExecutedQueryId, MemberRole, UserId};
use crate::queries::guard::check_viewer_query;
use crate::sources::models::{QueryOutput, QueryTimings};
use crate::sources::traits::BackendFactory;
use crate::store::models::{ConnectionRecord, ExecutedQueryRecord, QueryStatus};
use crate::store::traits::AppDb;
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Result of one execution. A failing statement is an outcome, not an error:
/// it is audited as `ERROR` and reported back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub executed_query_id: ExecutedQueryId,
    pub status: QueryStatus,
    /// Seconds.
    pub execution_time: f64,
    pub output: Option<QueryOutput>,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == QueryStatus::Success
    }
}

/// Runs user SQL against a connection and writes the audit row.
#[derive(Clone)]
pub struct QueryExecutor {
    db: Arc<dyn AppDb>,
    backends: Arc<dyn BackendFactory>,
}

impl QueryExecutor {
    pub fn new(db: Arc<dyn AppDb>, backends: Arc<dyn BackendFactory>) -> Self {
        Self { db, backends }
    }

    /// Errors only for a rejected viewer query or a failed audit write.
    #[tracing::instrument(level = "debug", skip(self, connection, sql), fields(connection_id = %connection.id))]
    pub async fn execute(
        &self,
        user_id: UserId,
        role: MemberRole,
        connection: &ConnectionRecord,
        sql: &str,
    ) -> Result<ExecutionOutcome> {
        check_viewer_query(role, sql)?;

        let started = Instant::now();
        let result = match self.backends.open(connection) {
            Ok(backend) => backend.query(sql).await,
            Err(e) => Err(e),
        };
        let duration = started.elapsed().as_secs_f64();

        let (status, output, error, timings, result_size) = match result {
            Ok(output) => {
                let timings = output.timings.clone();
                let size = output.row_count as i64;
                (QueryStatus::Success, Some(output), None, timings, size)
            }
            Err(e) => {
                tracing::warn!(error = %e, "query execution failed");
                (
                    QueryStatus::Error,
                    None,
                    Some(e.to_string()),
                    QueryTimings::default(),
                    0,
                )
            }
        };

        let record = ExecutedQueryRecord {
            id: ExecutedQueryId::new(),
            query: sql.to_string(),
            user_id,
            project_id: connection.project_id,
            connection_id: connection.id,
            status,
            duration,
            error: error.clone(),
            result_size,
            timings,
            executed_at: Utc::now(),
        };
        self.db.append_executed_query(&record).await?;
        tracing::info!(
            executed_query_id = %record.id,
            status = status.as_str(),
            duration_secs = duration,
            rows = result_size,
            "query executed"
        );

        Ok(ExecutionOutcome {
            executed_query_id: record.id,
            status,
            execution_time: duration,
            output,
            error,
        })
    }
}
