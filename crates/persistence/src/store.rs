//! 会话存储抽象层
//!
//! 会话以 ID 为键，关联到 notebook；列表按更新时间倒序返回摘要。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datasage_core::{ChatMessage, Conversation};
use serde::{Deserialize, Serialize};

/// 标题中保留的请求字符数
const TITLE_CHARS: usize = 50;

/// 摘要中最后一条消息的预览字符数
const PREVIEW_CHARS: usize = 100;

/// 存储错误
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("会话不存在: {0}")]
    NotFound(String),

    #[error("会话文件已损坏: {0}")]
    Corrupt(String),

    #[error("并发锁定失败: {0}")]
    LockFailed(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// 一个持久化的会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub notebook_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Conversation,
}

impl ConversationRecord {
    /// 新会话，标题取自第一条请求
    pub fn new(notebook_id: impl Into<String>, first_request: &str) -> Self {
        Self::with_id(ulid::Ulid::new().to_string(), notebook_id, first_request)
    }

    pub fn with_id(id: impl Into<String>, notebook_id: impl Into<String>, first_request: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            notebook_id: notebook_id.into(),
            title: title_for(first_request),
            created_at: now,
            updated_at: now,
            messages: Conversation::new(),
        }
    }

    /// 用一次运行后的完整对话替换消息
    pub fn replace_messages(&mut self, messages: Conversation) {
        self.messages = messages;
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            notebook_id: self.notebook_id.clone(),
            updated_at: self.updated_at,
            last_message_preview: self
                .messages
                .last()
                .map(|m: &ChatMessage| m.content.chars().take(PREVIEW_CHARS).collect())
                .unwrap_or_default(),
            message_count: self.messages.len(),
        }
    }
}

pub fn title_for(request: &str) -> String {
    let head: String = request.trim().chars().take(TITLE_CHARS).collect();
    format!("Query: {}...", head)
}

/// 会话列表项
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub notebook_id: String,
    pub updated_at: DateTime<Utc>,
    pub last_message_preview: String,
    pub message_count: usize,
}

/// 会话存储 Trait
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 保存会话（覆盖同 ID 的旧版本）
    async fn save(&self, record: &ConversationRecord) -> Result<()>;

    async fn load(&self, id: &str) -> Result<Option<ConversationRecord>>;

    /// 按更新时间倒序；`notebook_id` 为空时列出全部
    async fn list(&self, notebook_id: Option<&str>) -> Result<Vec<ConversationSummary>>;

    /// 返回是否确实删除了记录
    async fn delete(&self, id: &str) -> Result<bool>;
}

pub type SharedConversationStore = Arc<dyn ConversationStore>;

/// 会话 ID 会成为文件名，只允许字母数字、`-` 和 `_`
pub(crate) fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(StorageError::InvalidArgument(format!("invalid conversation id: {:?}", id)));
    }
    Ok(())
}

pub(crate) fn newest_first(mut summaries: Vec<ConversationSummary>) -> Vec<ConversationSummary> {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id)));
    summaries
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    records: RwLock<HashMap<String, ConversationRecord>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn save(&self, record: &ConversationRecord) -> Result<()> {
        validate_id(&record.id)?;
        let mut records = self
            .records
            .write()
            .map_err(|e| StorageError::LockFailed(e.to_string()))?;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| StorageError::LockFailed(e.to_string()))?;
        Ok(records.get(id).cloned())
    }

    async fn list(&self, notebook_id: Option<&str>) -> Result<Vec<ConversationSummary>> {
        let records = self
            .records
            .read()
            .map_err(|e| StorageError::LockFailed(e.to_string()))?;
        let summaries = records
            .values()
            .filter(|r| notebook_id.is_none_or(|nb| r.notebook_id == nb))
            .map(ConversationRecord::summary)
            .collect();
        Ok(newest_first(summaries))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StorageError::LockFailed(e.to_string()))?;
        Ok(records.remove(id).is_some())
    }
}
