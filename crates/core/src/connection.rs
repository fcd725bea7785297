//! Connection descriptors
//!
//! A descriptor is resolved once per agent run and handed, unchanged, to the
//! schema provider and to every query execution of that run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Database engine behind a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    #[default]
    #[serde(alias = "mariadb")]
    MySql,
    #[serde(alias = "postgres")]
    PostgreSql,
    Redshift,
    Snowflake,
    /// Anything else; prompts fall back to ANSI SQL guidance.
    #[serde(other)]
    Generic,
}

impl EngineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::MySql => "mysql",
            EngineType::PostgreSql => "postgresql",
            EngineType::Redshift => "redshift",
            EngineType::Snowflake => "snowflake",
            EngineType::Generic => "generic",
        }
    }

    /// Upper-case name used when addressing the model.
    pub fn display_name(&self) -> &'static str {
        match self {
            EngineType::MySql => "MYSQL",
            EngineType::PostgreSql => "POSTGRESQL",
            EngineType::Redshift => "REDSHIFT",
            EngineType::Snowflake => "SNOWFLAKE",
            EngineType::Generic => "SQL",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            EngineType::MySql => 3306,
            EngineType::PostgreSql => 5432,
            EngineType::Redshift => 5439,
            EngineType::Snowflake => 443,
            EngineType::Generic => 0,
        }
    }
}

impl From<&str> for EngineType {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => EngineType::MySql,
            "postgresql" | "postgres" | "pg" => EngineType::PostgreSql,
            "redshift" => EngineType::Redshift,
            "snowflake" => EngineType::Snowflake,
            _ => EngineType::Generic,
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an executor needs to reach one database
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub engine: EngineType,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Snowflake account / warehouse and similar engine-specific knobs
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl ConnectionDescriptor {
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or_else(|| self.engine.default_port())
    }

    /// Credential-free label for logs and CLI output.
    pub fn label(&self) -> String {
        format!(
            "{}://{}@{}:{}/{}",
            self.engine,
            self.username,
            self.host,
            self.port_or_default(),
            self.database
        )
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("options", &self.options.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// How a request names its database
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionRef {
    /// Fully specified by the caller
    Inline(ConnectionDescriptor),
    /// Looked up through a `ConnectionResolver` together with the notebook id
    Id(String),
}

impl From<ConnectionDescriptor> for ConnectionRef {
    fn from(descriptor: ConnectionDescriptor) -> Self {
        ConnectionRef::Inline(descriptor)
    }
}
