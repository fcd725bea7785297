//! Generation step: one LLM call that proposes SQL

use std::sync::Arc;
use std::time::Duration;

use datasage_core::llm::{CompletionRequest, LlmProvider, Message};
use datasage_core::{ChatMessage, ChatRole, EngineType};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::extract::{is_explicitly_final, last_sql_block, normalize_sql};
use crate::observation::truncate_chars;
use crate::prompts::{PromptContext, build_system_prompt};
use crate::state::AgentRunState;

/// Model parameters for generation calls
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// Engine assumed when the run has no resolved connection
    pub default_engine: EngineType,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.1,
            max_tokens: 4000,
            timeout: Duration::from_secs(30),
            default_engine: EngineType::MySql,
        }
    }
}

/// What one generation call produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Candidate { sql: String, is_final: bool },
    NoSql,
    Failed { reason: String },
}

/// How many earlier assistant turns a candidate is compared against.
const DUPLICATE_WINDOW: usize = 2;

pub struct GenerationStep {
    provider: Arc<dyn LlmProvider>,
    settings: GenerationSettings,
}

impl GenerationStep {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: GenerationSettings) -> Self {
        Self { provider, settings }
    }

    pub async fn run(&self, state: &mut AgentRunState) -> GenerationOutcome {
        let engine = match &state.connection {
            Some(conn) => conn.engine,
            None => {
                warn!(
                    engine = %self.settings.default_engine,
                    "No resolved connection, using default engine for prompt"
                );
                self.settings.default_engine
            }
        };

        let system_prompt = build_system_prompt(&PromptContext {
            schema_text: &state.schema_text,
            user_request: &state.user_request,
            engine,
            iteration: state.current_iteration,
            scope: state.scope.as_ref(),
        });

        let request = CompletionRequest {
            model: self.settings.model.clone(),
            messages: build_llm_messages(state, system_prompt),
            temperature: Some(self.settings.temperature),
            max_tokens: Some(self.settings.max_tokens),
            stop: None,
        };

        if state.current_iteration == 0 {
            info!(
                engine = %engine,
                schema_chars = state.schema_text.len(),
                "Starting SQL generation"
            );
        }

        let text = match tokio::time::timeout(self.settings.timeout, self.provider.complete(&request)).await {
            Err(_) => Err(format!(
                "LLM request timed out after {}s",
                self.settings.timeout.as_secs()
            )),
            Ok(Err(e)) => Err(e.to_string()),
            // 空回复按无 SQL 处理，由路由器再生成一次
            Ok(Ok(response)) => Ok(response.text().map(str::trim).unwrap_or_default().to_string()),
        };

        let text = match text {
            Ok(text) => text,
            Err(reason) => return fail(state, reason),
        };

        let candidate = last_sql_block(&text);
        let duplicate = candidate
            .as_deref()
            .is_some_and(|sql| repeats_recent_sql(state, sql));

        state.messages.push(
            ChatMessage::assistant(text.clone()).with_metadata(json!({
                "sql": candidate,
                "iteration": state.current_iteration,
            })),
        );

        let Some(sql) = candidate else {
            if state.current_iteration > 0 {
                warn!(iteration = state.current_iteration, "No SQL found in model response");
            }
            state.current_sql_query = None;
            state.current_iteration += 1;
            return GenerationOutcome::NoSql;
        };

        let explicit = is_explicitly_final(&text);
        let last_chance = state.on_last_iteration();
        let is_final = explicit || duplicate || last_chance;

        state.current_sql_query = Some(sql.clone());
        if is_final {
            state.final_sql = Some(sql.clone());
            info!(
                iteration = state.current_iteration,
                explicit,
                duplicate,
                last_chance,
                sql = %truncate_chars(&sql, 80),
                "SQL marked as final"
            );
        } else {
            debug!(iteration = state.current_iteration, sql = %sql, "Generated candidate SQL");
        }

        GenerationOutcome::Candidate { sql, is_final }
    }
}

/// System prompt followed by the conversation as the model sees it.
fn build_llm_messages(state: &AgentRunState, system_prompt: String) -> Vec<Message> {
    let mut messages = vec![Message::system(system_prompt)];
    messages.extend(state.messages.iter().filter_map(|m| match m.role {
        ChatRole::User | ChatRole::ToolResult => Some(Message::user(m.content.clone())),
        ChatRole::Assistant => Some(Message::assistant(m.content.clone())),
        ChatRole::System => None,
    }));

    if state.current_iteration == 0 {
        let ends_with_request = state
            .messages
            .last_turn()
            .is_some_and(|m| m.role == ChatRole::User && m.content.trim() == state.user_request.trim());
        if !ends_with_request {
            messages.push(Message::user(format!(
                "Please generate a SQL query for: {}",
                state.user_request
            )));
        }
    }
    messages
}

/// Exact repeat (modulo whitespace) of the SQL in one of the last assistant turns.
fn repeats_recent_sql(state: &AgentRunState, sql: &str) -> bool {
    let wanted = normalize_sql(sql);
    state
        .messages
        .recent_assistant(DUPLICATE_WINDOW)
        .filter_map(|m| {
            m.metadata_str("sql")
                .map(str::to_string)
                .or_else(|| last_sql_block(&m.content))
        })
        .any(|prev| normalize_sql(&prev) == wanted)
}

fn fail(state: &mut AgentRunState, reason: String) -> GenerationOutcome {
    warn!(reason = %reason, "SQL generation failed");
    state.should_continue = false;
    state.current_sql_query = None;

    let note = match &state.last_successful_sql {
        Some(sql) => {
            state.final_sql = Some(sql.clone());
            format!(
                "Unable to generate a new query ({}). Using the last query that executed successfully.",
                reason
            )
        }
        None => {
            state.error_message = Some(format!("Error generating SQL: {}", reason));
            format!("Unable to generate SQL: {}", reason)
        }
    };

    state.messages.push(
        ChatMessage::assistant(note).with_metadata(json!({ "error": reason })),
    );
    GenerationOutcome::Failed { reason }
}
