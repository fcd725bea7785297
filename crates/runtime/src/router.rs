//! Router: the single owner of termination policy
//!
//! Rules, in priority order:
//! 1. wall-clock budget exceeded => done (fallback promotion)
//! 2. iteration ceiling reached => done (fallback promotion)
//! 3. a step cleared `should_continue` => done
//! 4. `final_sql` set: failed last execution clears it and falls through to
//!    rule 7; successful last execution => done; pending => execute
//! 5. last turn is assistant with SQL => execute
//! 6. last turn is assistant without SQL => generate
//! 7. last turn is a tool result: failure streak or non-retryable failure
//!    => done, anything else => generate
//! 8. otherwise => generate

use datasage_core::{ChatMessage, ChatRole, Conversation};
use tracing::{debug, info};

use crate::classify::classify_failure;
use crate::state::{AgentRunState, Route, StopReason};

#[derive(Debug, Clone, Copy)]
pub struct Router {
    pub max_failure_streak: u32,
}

impl Default for Router {
    fn default() -> Self {
        Self {
            max_failure_streak: 3,
        }
    }
}

impl Router {
    pub fn new(max_failure_streak: u32) -> Self {
        Self { max_failure_streak }
    }

    /// Pick the next step. May clear or promote `final_sql` and record the
    /// reason for an early stop in `error_message`.
    pub fn decide(&self, state: &mut AgentRunState) -> Route {
        if state.budget_exhausted() {
            info!(
                elapsed_ms = state.started_at.elapsed().as_millis() as u64,
                "Run time budget exhausted"
            );
            promote_fallback(state);
            return Route::Done(StopReason::TimeBudget);
        }

        if state.ceiling_reached() {
            info!(max = state.max_iterations, "Max iterations reached");
            promote_fallback(state);
            return Route::Done(StopReason::IterationLimit);
        }

        if !state.should_continue {
            info!(error = ?state.error_message, "Stopping after fatal step error");
            promote_fallback(state);
            return Route::Done(StopReason::Aborted);
        }

        let last = state.messages.last_turn().cloned();

        if state.final_sql.is_some() {
            match last.as_ref().map(|m| m.role) {
                Some(ChatRole::ToolResult) if last.as_ref().is_some_and(ChatMessage::is_failure) => {
                    info!("Final SQL failed to execute, regenerating");
                    state.final_sql = None;
                }
                Some(ChatRole::ToolResult) => {
                    info!("Final SQL executed successfully");
                    return Route::Done(StopReason::Completed);
                }
                Some(ChatRole::Assistant) => {
                    debug!("Executing final SQL");
                    return Route::Execute;
                }
                _ => {}
            }
        }

        match last {
            Some(msg) if msg.role == ChatRole::Assistant => {
                if state.current_sql_query.is_some() {
                    Route::Execute
                } else {
                    debug!(iteration = state.current_iteration, "No SQL in last response");
                    Route::Generate
                }
            }
            Some(msg) if msg.is_tool_result() => self.after_tool_result(state, &msg),
            _ => Route::Generate,
        }
    }

    fn after_tool_result(&self, state: &mut AgentRunState, msg: &ChatMessage) -> Route {
        if !msg.is_failure() {
            debug!(iteration = state.current_iteration, "Execution succeeded, refining");
            return Route::Generate;
        }

        let streak = trailing_failures(&state.messages);
        if streak >= self.max_failure_streak as usize {
            info!(streak, "Too many consecutive failures, ending run");
            state.error_message = Some(format!(
                "Stopped after {} consecutive failed executions",
                streak
            ));
            return Route::Done(StopReason::FailureStreak);
        }

        let class = classify_failure(&msg.content);
        if !class.is_retryable() {
            info!(class = class.describe(), "Non-retryable failure, ending run");
            state.error_message = Some(format!("Stopped on {}: {}", class.describe(), msg.content));
            return Route::Done(StopReason::NonRetryable);
        }

        debug!(streak, "Retryable failure, regenerating");
        Route::Generate
    }
}

/// Consecutive failing tool results at the end of the conversation.
/// Assistant and system turns are skipped; a success or a user turn ends the streak.
pub fn trailing_failures(messages: &Conversation) -> usize {
    let mut count = 0;
    for msg in messages.iter().rev() {
        match msg.role {
            ChatRole::Assistant | ChatRole::System => continue,
            ChatRole::User => break,
            ChatRole::ToolResult if msg.is_failure() => count += 1,
            ChatRole::ToolResult => break,
        }
    }
    count
}

/// `final_sql` survives only if it is the SQL whose execution was the last
/// successful tool result; otherwise fall back to `last_successful_sql`.
fn promote_fallback(state: &mut AgentRunState) {
    let last_success_is_final = state
        .messages
        .last_tool_result()
        .filter(|m| m.is_success())
        .and_then(|m| m.metadata_str("sql"))
        .zip(state.final_sql.as_deref())
        .is_some_and(|(executed, fin)| executed == fin);

    if !last_success_is_final {
        if state.final_sql != state.last_successful_sql {
            debug!(fallback = ?state.last_successful_sql, "Promoting last successful SQL");
        }
        state.final_sql = state.last_successful_sql.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn state() -> AgentRunState {
        let mut s = AgentRunState::new("count customers", 10, Duration::from_secs(180));
        s.messages.push(ChatMessage::user("count customers"));
        s
    }

    fn assistant_sql(sql: &str) -> ChatMessage {
        ChatMessage::assistant(format!("```sql\n{sql}\n```")).with_metadata(json!({ "sql": sql }))
    }

    fn ok(sql: &str) -> ChatMessage {
        ChatMessage::tool_success("Query executed successfully. Returned 1 rows with 1 columns.")
            .with_metadata(json!({ "sql": sql }))
    }

    fn failed(text: &str) -> ChatMessage {
        ChatMessage::tool_failure(format!("SQL execution failed: {text}"))
    }

    #[test]
    fn test_empty_history_generates() {
        let mut s = AgentRunState::new("q", 10, Duration::from_secs(60));
        assert_eq!(Router::default().decide(&mut s), Route::Generate);
    }

    #[test]
    fn test_time_budget_wins_over_everything() {
        let mut s = state();
        s.time_budget = Duration::ZERO;
        s.messages.push(assistant_sql("SELECT 1"));
        s.current_sql_query = Some("SELECT 1".into());
        assert_eq!(Router::default().decide(&mut s), Route::Done(StopReason::TimeBudget));
    }

    #[test]
    fn test_ceiling_promotes_last_successful() {
        let mut s = state();
        s.messages.push(assistant_sql("SELECT 1"));
        s.messages.push(ok("SELECT 1"));
        s.messages.push(assistant_sql("SELECT 2"));
        s.messages.push(failed("syntax error"));
        s.last_successful_sql = Some("SELECT 1".into());
        s.current_iteration = 10;

        assert_eq!(Router::default().decide(&mut s), Route::Done(StopReason::IterationLimit));
        assert_eq!(s.final_sql.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_ceiling_drops_unexecuted_final() {
        let mut s = state();
        s.messages.push(assistant_sql("SELECT 1"));
        s.messages.push(ok("SELECT 1"));
        s.messages.push(assistant_sql("SELECT 2"));
        s.messages.push(failed("syntax error"));
        s.last_successful_sql = Some("SELECT 1".into());
        s.final_sql = Some("SELECT 2".into());
        s.current_iteration = 10;

        Router::default().decide(&mut s);
        assert_eq!(s.final_sql.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_ceiling_keeps_final_that_just_succeeded() {
        let mut s = state();
        s.messages.push(assistant_sql("SELECT 2"));
        s.messages.push(ok("SELECT 2"));
        s.last_successful_sql = Some("SELECT 2".into());
        s.final_sql = Some("SELECT 2".into());
        s.current_iteration = 10;

        assert_eq!(Router::default().decide(&mut s), Route::Done(StopReason::IterationLimit));
        assert_eq!(s.final_sql.as_deref(), Some("SELECT 2"));
    }

    #[test]
    fn test_should_continue_false_stops() {
        let mut s = state();
        s.should_continue = false;
        s.error_message = Some("Error generating SQL: timeout".into());
        assert_eq!(Router::default().decide(&mut s), Route::Done(StopReason::Aborted));
    }

    #[test]
    fn test_final_sql_routing() {
        let mut s = state();
        s.messages.push(assistant_sql("SELECT 1"));
        s.current_sql_query = Some("SELECT 1".into());
        s.final_sql = Some("SELECT 1".into());
        assert_eq!(Router::default().decide(&mut s), Route::Execute);

        s.messages.push(ok("SELECT 1"));
        assert_eq!(Router::default().decide(&mut s), Route::Done(StopReason::Completed));
    }

    #[test]
    fn test_failed_final_is_cleared_and_regenerated() {
        let mut s = state();
        s.messages.push(assistant_sql("SELECT * FORM t"));
        s.messages.push(failed("You have an error in your SQL syntax"));
        s.final_sql = Some("SELECT * FORM t".into());

        assert_eq!(Router::default().decide(&mut s), Route::Generate);
        assert!(s.final_sql.is_none());
    }

    #[test]
    fn test_failed_final_with_non_retryable_error_stops() {
        let mut s = state();
        s.messages.push(assistant_sql("SELECT 1"));
        s.messages.push(failed("Access denied for user 'x'"));
        s.final_sql = Some("SELECT 1".into());

        assert_eq!(Router::default().decide(&mut s), Route::Done(StopReason::NonRetryable));
        assert!(s.final_sql.is_none());
    }

    #[test]
    fn test_assistant_without_sql_generates() {
        let mut s = state();
        s.messages.push(ChatMessage::assistant("Could you clarify which table?"));
        assert_eq!(Router::default().decide(&mut s), Route::Generate);
    }

    #[test]
    fn test_success_without_final_refines() {
        let mut s = state();
        s.messages.push(assistant_sql("SELECT 1"));
        s.messages.push(ok("SELECT 1"));
        assert_eq!(Router::default().decide(&mut s), Route::Generate);
    }

    #[test]
    fn test_access_denied_short_circuits() {
        let mut s = state();
        s.messages.push(assistant_sql("SELECT 1"));
        s.messages.push(failed("Access denied for user 'analyst'@'%'"));
        assert_eq!(Router::default().decide(&mut s), Route::Done(StopReason::NonRetryable));
        assert!(s.error_message.as_deref().unwrap().contains("access denied"));
        assert!(s.final_sql.is_none());
    }

    #[test]
    fn test_three_failures_stop_without_promotion() {
        let mut s = state();
        s.last_successful_sql = Some("SELECT 0".into());
        for i in 0..3 {
            s.messages.push(assistant_sql(&format!("SELECT bad{i}")));
            s.messages.push(failed(&format!("Unknown column 'bad{i}'")));
        }
        assert_eq!(trailing_failures(&s.messages), 3);
        assert_eq!(Router::default().decide(&mut s), Route::Done(StopReason::FailureStreak));
        assert!(s.final_sql.is_none());
    }

    #[test]
    fn test_streak_is_broken_by_success_or_user() {
        let conversation = Conversation::from(vec![
            failed("a"),
            ChatMessage::assistant("x"),
            ok("SELECT 1"),
            ChatMessage::assistant("y"),
            failed("b"),
            ChatMessage::assistant("z"),
            failed("c"),
        ]);
        assert_eq!(trailing_failures(&conversation), 2);

        let conversation = Conversation::from(vec![
            failed("a"),
            failed("b"),
            ChatMessage::user("try again"),
            failed("c"),
        ]);
        assert_eq!(trailing_failures(&conversation), 1);
    }

    #[test]
    fn test_legacy_failure_text_counts_toward_streak() {
        let mut legacy = ChatMessage::tool_failure("SQL execution failed: x");
        legacy.failed = None;
        let conversation = Conversation::from(vec![legacy.clone(), legacy]);
        assert_eq!(trailing_failures(&conversation), 2);
    }
}
