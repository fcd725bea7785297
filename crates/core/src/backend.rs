//! Contracts for the services the agent talks to
//!
//! Engines, pooling and credential storage live behind these traits; the
//! agent only ever sees descriptors, schemas and normalized results.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::connection::ConnectionDescriptor;
use crate::query::{QueryError, QueryResult};
use crate::schema::DatabaseSchema;

#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("Schema fetch failed: {0}")]
    Fetch(String),

    #[error("Invalid schema payload: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Database connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Notebook not found or access denied: {0}")]
    NotebookNotFound(String),

    #[error("Failed to load connections: {0}")]
    Backend(String),
}

/// Runs SQL against a live database
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        connection: &ConnectionDescriptor,
        sql: &str,
    ) -> Result<QueryResult, QueryError>;
}

/// Introspects `schemas -> tables -> columns`
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn fetch_schema(
        &self,
        connection: &ConnectionDescriptor,
    ) -> Result<DatabaseSchema, SchemaError>;
}

/// Turns a connection id into a full descriptor, checking the notebook's access
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    async fn resolve(
        &self,
        connection_id: &str,
        notebook_id: &str,
    ) -> Result<ConnectionDescriptor, ResolveError>;
}

/// Resolver over a fixed set of descriptors.
///
/// A notebook listed in `notebooks` may only use the connection ids mapped to
/// it; notebooks that are not listed may use any known connection.
#[derive(Debug, Clone, Default)]
pub struct StaticConnectionResolver {
    connections: HashMap<String, ConnectionDescriptor>,
    notebooks: HashMap<String, Vec<String>>,
}

impl StaticConnectionResolver {
    pub fn new(connections: impl IntoIterator<Item = ConnectionDescriptor>) -> Self {
        Self {
            connections: connections.into_iter().map(|c| (c.id.clone(), c)).collect(),
            notebooks: HashMap::new(),
        }
    }

    pub fn with_notebook(mut self, notebook_id: impl Into<String>, connection_ids: Vec<String>) -> Self {
        self.notebooks.insert(notebook_id.into(), connection_ids);
        self
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ConnectionDescriptor> {
        self.connections.values()
    }
}

#[async_trait]
impl ConnectionResolver for StaticConnectionResolver {
    async fn resolve(
        &self,
        connection_id: &str,
        notebook_id: &str,
    ) -> Result<ConnectionDescriptor, ResolveError> {
        if let Some(allowed) = self.notebooks.get(notebook_id) {
            if !allowed.iter().any(|id| id == connection_id) {
                return Err(ResolveError::NotebookNotFound(notebook_id.to_string()));
            }
        }
        self.connections
            .get(connection_id)
            .cloned()
            .ok_or_else(|| ResolveError::ConnectionNotFound(connection_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::EngineType;

    fn descriptor(id: &str) -> ConnectionDescriptor {
        ConnectionDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            engine: EngineType::MySql,
            host: "localhost".to_string(),
            port: None,
            database: "app".to_string(),
            username: "root".to_string(),
            password: String::new(),
            options: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticConnectionResolver::new(vec![descriptor("a"), descriptor("b")])
            .with_notebook("nb-1", vec!["a".to_string()]);

        assert_eq!(resolver.resolve("a", "nb-1").await.unwrap().id, "a");
        assert_eq!(resolver.resolve("b", "any-notebook").await.unwrap().id, "b");
        assert_eq!(
            resolver.resolve("b", "nb-1").await.unwrap_err(),
            ResolveError::NotebookNotFound("nb-1".to_string())
        );
        assert_eq!(
            resolver.resolve("zzz", "x").await.unwrap_err(),
            ResolveError::ConnectionNotFound("zzz".to_string())
        );
    }
}
