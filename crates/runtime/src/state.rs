//! Per-run agent state

use std::time::{Duration, Instant};

use datasage_core::{ConnectionDescriptor, Conversation, SchemaScope};
use serde::Serialize;

/// State threaded through every router decision of one run.
///
/// Built fresh by `SqlAgent::run`; never shared between runs.
#[derive(Debug, Clone)]
pub struct AgentRunState {
    pub user_request: String,
    pub messages: Conversation,
    /// Resolved once at the start of the run
    pub connection: Option<ConnectionDescriptor>,
    /// Why `connection` is absent, when resolution failed
    pub connection_error: Option<String>,
    pub schema_text: String,
    pub scope: Option<SchemaScope>,

    pub current_sql_query: Option<String>,
    pub last_successful_sql: Option<String>,
    pub final_sql: Option<String>,

    pub current_iteration: u32,
    pub max_iterations: u32,
    pub started_at: Instant,
    pub time_budget: Duration,

    pub error_message: Option<String>,
    pub should_continue: bool,
}

impl AgentRunState {
    pub fn new(user_request: impl Into<String>, max_iterations: u32, time_budget: Duration) -> Self {
        Self {
            user_request: user_request.into(),
            messages: Conversation::new(),
            connection: None,
            connection_error: None,
            schema_text: String::new(),
            scope: None,
            current_sql_query: None,
            last_successful_sql: None,
            final_sql: None,
            current_iteration: 0,
            max_iterations,
            started_at: Instant::now(),
            time_budget,
            error_message: None,
            should_continue: true,
        }
    }

    pub fn budget_exhausted(&self) -> bool {
        self.started_at.elapsed() >= self.time_budget
    }

    pub fn ceiling_reached(&self) -> bool {
        self.current_iteration >= self.max_iterations
    }

    /// Candidate SQL produced on the last allowed generation is final.
    pub fn on_last_iteration(&self) -> bool {
        self.current_iteration + 1 >= self.max_iterations
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Final SQL executed successfully
    Completed,
    TimeBudget,
    IterationLimit,
    /// A step set `should_continue = false`
    Aborted,
    FailureStreak,
    NonRetryable,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::TimeBudget => "time_budget",
            StopReason::IterationLimit => "iteration_limit",
            StopReason::Aborted => "aborted",
            StopReason::FailureStreak => "failure_streak",
            StopReason::NonRetryable => "non_retryable",
        }
    }
}

/// Router output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Generate,
    Execute,
    Done(StopReason),
}
