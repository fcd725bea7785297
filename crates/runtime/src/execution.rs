//! Execution step: run the current candidate and record what happened

use std::sync::Arc;
use std::time::Duration;

use datasage_core::{
    ChatMessage, ConnectionDescriptor, QueryError, QueryErrorKind, QueryExecutor, QueryResult,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::extract::is_read_only;
use crate::observation::{summarize_failure, summarize_success, truncate_chars};
use crate::state::AgentRunState;

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub sample_rows: usize,
    pub max_observation_chars: usize,
    /// Reject anything other than SELECT / EXPLAIN / SHOW before it reaches the executor
    pub read_only: bool,
    pub query_timeout: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            sample_rows: 3,
            max_observation_chars: 4000,
            read_only: false,
            query_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Succeeded { row_count: u64 },
    Failed { kind: QueryErrorKind },
    /// Nothing to run against; the run cannot continue
    NoConnection,
    /// Router sent us here without a candidate
    NoSql,
}

pub struct ExecutionStep {
    executor: Arc<dyn QueryExecutor>,
    settings: ExecutionSettings,
}

impl ExecutionStep {
    pub fn new(executor: Arc<dyn QueryExecutor>, settings: ExecutionSettings) -> Self {
        Self { executor, settings }
    }

    pub async fn run(&self, state: &mut AgentRunState) -> ExecutionOutcome {
        let Some(sql) = state
            .current_sql_query
            .clone()
            .or_else(|| state.final_sql.clone())
        else {
            warn!("Execution requested without SQL");
            state.current_iteration += 1;
            return ExecutionOutcome::NoSql;
        };

        let Some(connection) = state.connection.clone() else {
            let reason = state
                .connection_error
                .clone()
                .unwrap_or_else(|| "Database connection not found".to_string());
            warn!(error = %reason, "Cannot execute without a connection");
            state.should_continue = false;
            state.error_message = Some(reason.clone());
            state.messages.push(
                ChatMessage::tool_failure(summarize_failure(
                    &QueryError::connection(reason),
                    self.settings.max_observation_chars,
                ))
                .with_metadata(json!({ "sql": sql, "error_kind": QueryErrorKind::Connection })),
            );
            state.current_iteration += 1;
            return ExecutionOutcome::NoConnection;
        };

        info!(
            iteration = state.current_iteration,
            connection = %connection.label(),
            sql = %truncate_chars(&sql, 120),
            "Executing SQL"
        );

        let result = self.execute(&connection, &sql).await;
        state.current_iteration += 1;

        match result {
            Ok(result) => {
                debug!(
                    rows = result.row_count,
                    elapsed = result.elapsed_seconds,
                    "SQL executed"
                );
                state.last_successful_sql = Some(sql.clone());
                state.messages.push(
                    ChatMessage::tool_success(summarize_success(
                        &result,
                        self.settings.sample_rows,
                        self.settings.max_observation_chars,
                    ))
                    .with_metadata(json!({
                        "sql": sql,
                        "row_count": result.row_count,
                        "column_count": result.column_count(),
                        "elapsed_seconds": result.elapsed_seconds,
                    })),
                );
                ExecutionOutcome::Succeeded {
                    row_count: result.row_count,
                }
            }
            Err(error) => {
                warn!(kind = ?error.kind, error = %error.message, "SQL execution failed");
                state.messages.push(
                    ChatMessage::tool_failure(summarize_failure(
                        &error,
                        self.settings.max_observation_chars,
                    ))
                    .with_metadata(json!({ "sql": sql, "error_kind": error.kind })),
                );
                ExecutionOutcome::Failed { kind: error.kind }
            }
        }
    }

    async fn execute(
        &self,
        connection: &ConnectionDescriptor,
        sql: &str,
    ) -> Result<QueryResult, QueryError> {
        if self.settings.read_only && !is_read_only(sql) {
            return Err(QueryError::new(
                QueryErrorKind::ReadOnly,
                "Only read-only queries (SELECT, EXPLAIN, SHOW) are allowed",
            ));
        }

        match tokio::time::timeout(self.settings.query_timeout, self.executor.execute(connection, sql)).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::timeout(self.settings.query_timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedExecutor, descriptor, rows};

    fn state(sql: &str) -> AgentRunState {
        let mut s = AgentRunState::new("show me 5 customers", 10, Duration::from_secs(180));
        s.connection = Some(descriptor());
        s.messages.push(ChatMessage::user("show me 5 customers"));
        s.messages.push(ChatMessage::assistant(format!("```sql\n{sql}\n```")));
        s.current_sql_query = Some(sql.to_string());
        s
    }

    fn step(executor: Arc<ScriptedExecutor>) -> ExecutionStep {
        ExecutionStep::new(executor, ExecutionSettings::default())
    }

    #[tokio::test]
    async fn test_success_records_observation() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(rows(5))]));
        let mut s = state("SELECT * FROM customers LIMIT 5");

        let outcome = step(executor.clone()).run(&mut s).await;

        assert_eq!(outcome, ExecutionOutcome::Succeeded { row_count: 5 });
        assert_eq!(s.current_iteration, 1);
        assert_eq!(s.last_successful_sql.as_deref(), Some("SELECT * FROM customers LIMIT 5"));
        let last = s.messages.last().unwrap();
        assert!(last.is_success());
        assert!(last.content.starts_with("Query executed successfully. Returned 5 rows"));
        assert_eq!(last.metadata_str("sql"), Some("SELECT * FROM customers LIMIT 5"));
        assert_eq!(executor.executed().await, vec!["SELECT * FROM customers LIMIT 5"]);
    }

    #[tokio::test]
    async fn test_failure_is_retryable_observation() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Err(QueryError::execution(
            "You have an error in your SQL syntax near 'FORM customers'",
        ))]));
        let mut s = state("SELECT * FORM customers");

        let outcome = step(executor).run(&mut s).await;

        assert_eq!(outcome, ExecutionOutcome::Failed { kind: QueryErrorKind::Execution });
        assert!(s.should_continue);
        assert!(s.error_message.is_none());
        assert!(s.last_successful_sql.is_none());
        let last = s.messages.last().unwrap();
        assert!(last.is_failure());
        assert!(last.content.starts_with("SQL execution failed: You have an error"));
        assert_eq!(s.current_iteration, 1);
    }

    #[tokio::test]
    async fn test_missing_connection_stops_run() {
        let executor = Arc::new(ScriptedExecutor::new(vec![]));
        let mut s = state("SELECT 1");
        s.connection = None;
        s.connection_error = Some("Database connection not found: conn-9".to_string());

        let outcome = step(executor.clone()).run(&mut s).await;

        assert_eq!(outcome, ExecutionOutcome::NoConnection);
        assert!(!s.should_continue);
        assert_eq!(
            s.error_message.as_deref(),
            Some("Database connection not found: conn-9")
        );
        assert!(s.messages.last().unwrap().is_failure());
        assert!(executor.executed().await.is_empty());
    }

    #[tokio::test]
    async fn test_read_only_guard_blocks_writes() {
        let executor = Arc::new(ScriptedExecutor::new(vec![]));
        let mut s = state("DELETE FROM customers");
        let settings = ExecutionSettings {
            read_only: true,
            ..ExecutionSettings::default()
        };

        let outcome = ExecutionStep::new(executor.clone(), settings).run(&mut s).await;

        assert_eq!(outcome, ExecutionOutcome::Failed { kind: QueryErrorKind::ReadOnly });
        assert!(s.messages.last().unwrap().content.contains("Only read-only queries"));
        assert!(executor.executed().await.is_empty());
        assert!(s.should_continue);
    }

    #[tokio::test]
    async fn test_final_sql_used_when_no_current_candidate() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(rows(1))]));
        let mut s = state("SELECT 1");
        s.current_sql_query = None;
        s.final_sql = Some("SELECT 2".to_string());

        step(executor.clone()).run(&mut s).await;
        assert_eq!(executor.executed().await, vec!["SELECT 2"]);
    }
}
