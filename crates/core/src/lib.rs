//! DataSage Core - 核心数据模型
//!
//! 包含：
//! - Conversation: 对话消息
//! - Connection: 数据库连接描述
//! - Schema: 数据库结构与提示词格式化
//! - Query: 查询结果与执行错误
//! - Backend: 执行器 / 结构 / 连接解析契约
//! - Config: 配置系统
//! - LLM: Provider 抽象

mod backend;
mod connection;
mod conversation;
mod query;
mod schema;

pub mod config;
pub mod llm;

pub use backend::*;
pub use config::{AgentConfig, ConfigError, ConfigLoader, DataSageConfig};
pub use connection::*;
pub use conversation::*;
pub use query::*;
pub use schema::*;
