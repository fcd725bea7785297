//! SQL agent: drives generate / execute rounds under the router's control

use std::sync::Arc;
use std::time::Duration;

use datasage_core::llm::LlmProvider;
use datasage_core::{
    AgentConfig, ChatMessage, ConnectionDescriptor, ConnectionRef, ConnectionResolver,
    Conversation, QueryExecutor, SchemaProvider, SchemaScope,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::execution::{ExecutionSettings, ExecutionStep};
use crate::generation::{GenerationSettings, GenerationStep};
use crate::router::Router;
use crate::state::{AgentRunState, Route, StopReason};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid agent configuration: {0}")]
    ConfigError(String),
}

/// 一次自然语言查询请求
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub user_request: String,

    /// 直接给出的连接，或需要解析的连接 ID
    pub connection: ConnectionRef,

    /// 用于检查连接访问权限的 notebook
    pub notebook_id: String,

    /// 继续已有会话时传入
    pub conversation_id: Option<String>,

    /// 之前的对话轮次
    pub prior_conversation: Conversation,

    /// 限定 schema / table 的提示
    pub scope: Option<SchemaScope>,
}

impl AgentRequest {
    pub fn new(user_request: impl Into<String>, connection: impl Into<ConnectionRef>) -> Self {
        Self {
            user_request: user_request.into(),
            connection: connection.into(),
            notebook_id: String::new(),
            conversation_id: None,
            prior_conversation: Conversation::new(),
            scope: None,
        }
    }
}

/// 运行结果
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub conversation_id: String,

    /// 最终 SQL；没有任何查询成功时为空
    pub final_sql: Option<String>,

    /// 完整对话，包括之前的轮次
    pub conversation: Conversation,

    pub iterations_used: u32,

    /// 提前结束的原因说明
    pub warning: Option<String>,

    pub stop_reason: StopReason,
}

/// Text-to-SQL agent.
///
/// Collaborators are injected as trait objects; one agent serves any number
/// of concurrent runs since all per-run state lives in [`AgentRunState`].
pub struct SqlAgent {
    generation: GenerationStep,
    provider: Arc<dyn LlmProvider>,
    execution: ExecutionStep,
    executor: Arc<dyn QueryExecutor>,
    schema_provider: Arc<dyn SchemaProvider>,
    resolver: Option<Arc<dyn ConnectionResolver>>,
    router: Router,
    config: AgentConfig,
    generation_settings: GenerationSettings,
    execution_settings: ExecutionSettings,
}

impl SqlAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn QueryExecutor>,
        schema_provider: Arc<dyn SchemaProvider>,
        config: AgentConfig,
    ) -> Result<Self, AgentError> {
        config.validate().map_err(AgentError::ConfigError)?;

        let generation_settings = GenerationSettings {
            timeout: config.llm_timeout(),
            default_engine: config.default_engine,
            ..GenerationSettings::default()
        };
        let execution_settings = ExecutionSettings {
            sample_rows: config.sample_rows,
            max_observation_chars: config.max_observation_chars,
            read_only: config.read_only,
            ..ExecutionSettings::default()
        };

        Ok(Self {
            generation: GenerationStep::new(provider.clone(), generation_settings.clone()),
            provider,
            execution: ExecutionStep::new(executor.clone(), execution_settings.clone()),
            executor,
            schema_provider,
            resolver: None,
            router: Router::new(config.max_failure_streak),
            config,
            generation_settings,
            execution_settings,
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Override model parameters. The LLM timeout from the agent config still applies.
    pub fn with_generation(mut self, settings: GenerationSettings) -> Self {
        self.generation_settings = GenerationSettings {
            timeout: self.config.llm_timeout(),
            default_engine: self.config.default_engine,
            ..settings
        };
        self.generation = GenerationStep::new(self.provider.clone(), self.generation_settings.clone());
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.execution_settings.query_timeout = timeout;
        self.execution = ExecutionStep::new(self.executor.clone(), self.execution_settings.clone());
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn execution_settings(&self) -> &ExecutionSettings {
        &self.execution_settings
    }

    /// Run one request to completion. Step failures never surface as errors;
    /// they end the run with a `warning` and whatever SQL last succeeded.
    pub async fn run(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let user_request = request.user_request.trim().to_string();
        if user_request.is_empty() {
            return Err(AgentError::InvalidRequest("user request is empty".to_string()));
        }

        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| ulid::Ulid::new().to_string());
        info!(conversation_id = %conversation_id, request = %user_request, "Processing SQL request");

        let mut state = AgentRunState::new(
            user_request.clone(),
            self.config.max_iterations,
            self.config.run_timeout(),
        );
        state.scope = request.scope.clone();

        match self.resolve_connection(&request).await {
            Ok(connection) => state.connection = Some(connection),
            Err(reason) => {
                warn!(error = %reason, "Connection resolution failed");
                state.connection_error = Some(reason);
            }
        }

        state.schema_text = self.schema_text(&state).await;

        state.messages = request.prior_conversation;
        state.messages.push(ChatMessage::user(user_request));

        let stop_reason = loop {
            let route = self.router.decide(&mut state);
            debug!(?route, iteration = state.current_iteration, "Routing");
            match route {
                Route::Generate => {
                    self.generation.run(&mut state).await;
                }
                Route::Execute => {
                    self.execution.run(&mut state).await;
                }
                Route::Done(reason) => break reason,
            }
        };

        info!(
            conversation_id = %conversation_id,
            stop_reason = stop_reason.as_str(),
            iterations = state.current_iteration,
            has_sql = state.final_sql.is_some(),
            "SQL request finished"
        );

        Ok(AgentResponse {
            conversation_id,
            final_sql: state.final_sql,
            conversation: state.messages,
            iterations_used: state.current_iteration,
            warning: state.error_message,
            stop_reason,
        })
    }

    async fn resolve_connection(&self, request: &AgentRequest) -> Result<ConnectionDescriptor, String> {
        match &request.connection {
            ConnectionRef::Inline(descriptor) => Ok(descriptor.clone()),
            ConnectionRef::Id(id) => {
                let resolver = self
                    .resolver
                    .as_ref()
                    .ok_or_else(|| format!("Database connection not found: {}", id))?;
                resolver
                    .resolve(id, &request.notebook_id)
                    .await
                    .map_err(|e| e.to_string())
            }
        }
    }

    async fn schema_text(&self, state: &AgentRunState) -> String {
        let Some(connection) = &state.connection else {
            return "Schema information unavailable: no database connection".to_string();
        };
        match self.schema_provider.fetch_schema(connection).await {
            Ok(schema) => {
                debug!(tables = schema.table_count(), "Schema loaded");
                schema.format_for_prompt(state.scope.as_ref())
            }
            Err(e) => {
                warn!(error = %e, "Schema fetch failed, continuing without schema");
                format!("Schema information unavailable: {}", e)
            }
        }
    }
}
