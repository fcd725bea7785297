//! HTTP clients for the remote query service
//!
//! The service owns drivers and pooling. Two endpoints:
//! - `POST {base}/query`  `{connection, sql}` -> result payload
//! - `POST {base}/schema` `{connection}` -> `[{name, tables: [...]}]`
//!   (or the same list under a `schemas` key)

use std::time::Duration;

use async_trait::async_trait;
use datasage_core::config::ExecutorConfig;
use datasage_core::{
    ConnectionDescriptor, DatabaseSchema, QueryError, QueryErrorKind, QueryExecutor, QueryResult,
    SchemaError, SchemaProvider,
};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

#[derive(Serialize)]
struct QueryBody<'a> {
    connection: &'a ConnectionDescriptor,
    sql: &'a str,
}

#[derive(Serialize)]
struct SchemaBody<'a> {
    connection: &'a ConnectionDescriptor,
}

/// Shared HTTP plumbing for both endpoints
#[derive(Clone)]
pub struct RemoteService {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl std::fmt::Debug for RemoteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteService")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl RemoteService {
    pub fn from_config(config: &ExecutorConfig) -> Result<Self, String> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| "executor.base_url is not configured".to_string())?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.query_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<Value, reqwest::Error> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "Calling query service");

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?.json().await
    }
}

fn transport_error(e: reqwest::Error) -> QueryError {
    if e.is_timeout() {
        QueryError::new(QueryErrorKind::Timeout, format!("Query timed out: {}", e))
    } else if e.is_connect() {
        QueryError::connection(format!("could not connect to query service: {}", e))
    } else if let Some(status) = e.status() {
        QueryError::protocol(format!("query service returned {}", status))
    } else {
        QueryError::protocol(e.to_string())
    }
}

/// [`QueryExecutor`] backed by the query service
#[derive(Debug, Clone)]
pub struct HttpQueryExecutor {
    service: RemoteService,
}

impl HttpQueryExecutor {
    pub fn new(service: RemoteService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute(
        &self,
        connection: &ConnectionDescriptor,
        sql: &str,
    ) -> Result<QueryResult, QueryError> {
        let payload = self
            .service
            .post("query", &QueryBody { connection, sql })
            .await
            .map_err(transport_error)?;
        QueryResult::from_payload(&payload)
    }
}

/// [`SchemaProvider`] backed by the query service
#[derive(Debug, Clone)]
pub struct HttpSchemaProvider {
    service: RemoteService,
}

impl HttpSchemaProvider {
    pub fn new(service: RemoteService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl SchemaProvider for HttpSchemaProvider {
    async fn fetch_schema(
        &self,
        connection: &ConnectionDescriptor,
    ) -> Result<DatabaseSchema, SchemaError> {
        let payload = self
            .service
            .post("schema", &SchemaBody { connection })
            .await
            .map_err(|e| SchemaError::Fetch(e.to_string()))?;
        parse_schema_payload(payload)
    }
}

pub fn parse_schema_payload(payload: Value) -> Result<DatabaseSchema, SchemaError> {
    if let Some(error) = payload.get("error").and_then(Value::as_str) {
        return Err(SchemaError::Fetch(error.to_string()));
    }
    let list = match payload {
        Value::Object(mut map) if map.contains_key("schemas") => map.remove("schemas").unwrap_or_default(),
        other => other,
    };
    serde_json::from_value(list).map_err(|e| SchemaError::Invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_payload_shapes() {
        let list = json!([{"name": "shop", "tables": [
            {"name": "customers", "rowCount": 120, "columns": [{"name": "id", "type": "int", "key": "PRI"}]}
        ]}]);
        let schema = parse_schema_payload(list.clone()).unwrap();
        assert_eq!(schema.table_count(), 1);
        assert_eq!(schema.schemas[0].tables[0].row_estimate, Some(120));

        let wrapped = parse_schema_payload(json!({ "schemas": list })).unwrap();
        assert_eq!(wrapped, schema);
    }

    #[test]
    fn test_schema_payload_errors() {
        assert!(matches!(
            parse_schema_payload(json!({"error": "Access denied"})),
            Err(SchemaError::Fetch(m)) if m == "Access denied"
        ));
        assert!(matches!(
            parse_schema_payload(json!("nope")),
            Err(SchemaError::Invalid(_))
        ));
    }

    #[test]
    fn test_service_requires_base_url() {
        let config = ExecutorConfig::default();
        assert!(RemoteService::from_config(&config).is_err());

        let config = ExecutorConfig {
            base_url: Some("http://localhost:8000/api/".to_string()),
            ..ExecutorConfig::default()
        };
        let service = RemoteService::from_config(&config).unwrap();
        assert_eq!(service.base_url(), "http://localhost:8000/api");
    }

    #[test]
    fn test_query_body_carries_descriptor() {
        let connection: ConnectionDescriptor = serde_json::from_value(json!({
            "id": "c1", "name": "shop", "type": "postgresql", "host": "db",
            "database": "shop", "username": "u", "password": "p"
        }))
        .unwrap();
        let body = serde_json::to_value(QueryBody { connection: &connection, sql: "SELECT 1" }).unwrap();
        assert_eq!(body["sql"], "SELECT 1");
        assert_eq!(body["connection"]["type"], "postgresql");
        assert_eq!(body["connection"]["password"], "p");
    }
}
