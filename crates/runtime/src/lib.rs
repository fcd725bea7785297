//! DataSage Runtime - Text-to-SQL 代理循环
//!
//! 职责：
//! - 生成 SQL（LLM 调用 + 代码块提取）
//! - 执行 SQL 并将结果摘要反馈给模型
//! - 路由器统一决定继续、执行或结束
//!
//! 架构：
//! - agent: 对外入口 `SqlAgent`
//! - router: 终止策略
//! - generation / execution: 两个步骤
//! - extract / classify / observation / prompts: 纯函数工具

mod agent;
mod classify;
mod execution;
mod extract;
mod generation;
mod observation;
mod prompts;
mod router;
mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use agent::{AgentError, AgentRequest, AgentResponse, SqlAgent};
pub use classify::{FailureClass, classify_failure};
pub use execution::{ExecutionOutcome, ExecutionSettings, ExecutionStep};
pub use extract::{extract_sql_blocks, is_explicitly_final, is_read_only, last_sql_block, normalize_sql};
pub use generation::{GenerationOutcome, GenerationSettings, GenerationStep};
pub use observation::{summarize_failure, summarize_success, truncate_chars};
pub use prompts::{PromptContext, build_system_prompt, dialect_notes};
pub use router::{Router, trailing_failures};
pub use state::{AgentRunState, Route, StopReason};
