//! DataSage Persistence - 会话持久化层
//!
//! 支持两种存储后端：
//! - 内存存储（测试、一次性运行）
//! - JSON 文件存储（默认）
//!
//! 设计原则：
//! - 原子写入（临时文件 + rename）
//! - 校验和检测损坏的文件
//! - 运行结束后才保存会话

pub mod json;
pub mod store;

pub use json::JsonConversationStore;
pub use store::{
    ConversationRecord, ConversationStore, ConversationSummary, MemoryConversationStore, Result,
    SharedConversationStore, StorageError,
};
