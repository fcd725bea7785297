//! DataSage Interface - 交互层
//!
//! 职责：
//! - CLI 命令行工具
//! - 远程查询服务的 HTTP 客户端
//! - 连接定义文件加载
//! - 结果渲染（表格 / JSON）

pub mod cli;
pub mod connections;
pub mod remote;
pub mod render;


pub use cli::{CliError, OutputFormat, init_tracing, run_cli};
pub use connections::ConnectionsFile;
pub use remote::{HttpQueryExecutor, HttpSchemaProvider, RemoteService};
