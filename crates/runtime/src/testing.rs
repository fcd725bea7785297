//! Scripted collaborators shared by unit and integration tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use datasage_core::llm::{
    Choice, CompletionRequest, CompletionResponse, LlmProvider, Message, ProviderConfig,
    ProviderError, ProviderType, Usage,
};
use datasage_core::{
    ConnectionDescriptor, DatabaseSchema, EngineType, QueryError, QueryExecutor, QueryResult,
    SchemaError, SchemaProvider,
};
use tokio::sync::Mutex as TokioMutex;

pub fn reply(text: &str) -> CompletionResponse {
    CompletionResponse {
        id: "resp".to_string(),
        model: "mock-model".to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(text),
            finish_reason: Some("stop".to_string()),
        }],
        usage: None,
    }
}

pub fn sql_reply(sql: &str) -> CompletionResponse {
    reply(&format!("Here is the query:\n```sql\n{sql}\n```"))
}

pub fn final_reply(sql: &str) -> CompletionResponse {
    reply(&format!("```sql\n{sql}\n```\nThis is the final query."))
}

pub struct ScriptedProvider {
    config: ProviderConfig,
    responses: Arc<TokioMutex<VecDeque<CompletionResponse>>>,
    requests: Arc<TokioMutex<Vec<CompletionRequest>>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            config: ProviderConfig {
                name: "mock".to_string(),
                provider_type: ProviderType::OpenAi,
                api_key: "test".to_string(),
                base_url: None,
                organization: None,
                default_model: "mock-model".to_string(),
                timeout_ms: 1000,
            },
            responses: Arc::new(TokioMutex::new(VecDeque::from(responses))),
            requests: Arc::new(TokioMutex::new(Vec::new())),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn calls(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAi
    }

    fn name(&self) -> &str {
        "mock-provider"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.requests.lock().await.push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ProviderError::Api {
                message: "no scripted response left".to_string(),
                status_code: Some(503),
            })
    }

    fn estimate_tokens(&self, _request: &CompletionRequest) -> Usage {
        Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Pops one scripted result per call and logs the SQL with its outcome.
pub struct ScriptedExecutor {
    results: TokioMutex<VecDeque<Result<QueryResult, QueryError>>>,
    log: TokioMutex<Vec<(String, bool)>>,
}

impl ScriptedExecutor {
    pub fn new(results: Vec<Result<QueryResult, QueryError>>) -> Self {
        Self {
            results: TokioMutex::new(VecDeque::from(results)),
            log: TokioMutex::new(Vec::new()),
        }
    }

    pub async fn executed(&self) -> Vec<String> {
        self.log.lock().await.iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub async fn succeeded(&self) -> Vec<String> {
        self.log
            .lock()
            .await
            .iter()
            .filter(|(_, ok)| *ok)
            .map(|(sql, _)| sql.clone())
            .collect()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _connection: &ConnectionDescriptor,
        sql: &str,
    ) -> Result<QueryResult, QueryError> {
        let result = self
            .results
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(QueryError::execution("no scripted result left")));
        self.log.lock().await.push((sql.to_string(), result.is_ok()));
        result
    }
}

pub struct StaticSchema(pub DatabaseSchema);

#[async_trait]
impl SchemaProvider for StaticSchema {
    async fn fetch_schema(
        &self,
        _connection: &ConnectionDescriptor,
    ) -> Result<DatabaseSchema, SchemaError> {
        Ok(self.0.clone())
    }
}

pub fn rows(n: usize) -> QueryResult {
    let rows = (1..=n)
        .map(|i| {
            let mut row = serde_json::Map::new();
            row.insert("id".to_string(), serde_json::json!(i));
            row
        })
        .collect();
    QueryResult::new(vec!["id".to_string()], rows, 0.01)
}

pub fn descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor {
        id: "conn-1".to_string(),
        name: "shop".to_string(),
        engine: EngineType::MySql,
        host: "localhost".to_string(),
        port: None,
        database: "shop".to_string(),
        username: "analyst".to_string(),
        password: "secret".to_string(),
        options: Default::default(),
    }
}
