//! DataSage 配置系统
//!
//! 支持 YAML 配置文件和环境变量

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::connection::EngineType;
use crate::llm::{ProviderConfig, ProviderType};

/// 环境变量：显式配置文件路径
pub const CONFIG_PATH_ENV: &str = "DATASAGE_CONFIG";
/// 环境变量：通用 API Key
pub const LLM_API_KEY_ENV: &str = "DATASAGE_LLM_API_KEY";
/// 环境变量：远程查询服务地址
pub const EXECUTOR_URL_ENV: &str = "DATASAGE_EXECUTOR_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// DataSage 主配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSageConfig {
    /// LLM 配置
    #[serde(default)]
    pub llm: LlmConfig,

    /// Agent 循环配置
    #[serde(default)]
    pub agent: AgentConfig,

    /// 查询执行服务配置
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// 对话存储配置
    #[serde(default)]
    pub storage: StorageConfig,
}

impl DataSageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.agent.validate().map_err(ConfigError::Invalid)?;
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.model must not be empty".to_string()));
        }
        Ok(())
    }
}

/// LLM 配置
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider 名称 (openai / anthropic / azure / ollama)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// 默认模型
    #[serde(default = "default_model")]
    pub model: String,

    /// API 基础 URL
    pub base_url: Option<String>,

    /// API Key (优先级低于 Provider 专属环境变量)
    pub api_key: Option<String>,

    /// 组织 ID (可选)
    pub organization: Option<String>,

    /// 温度参数
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// 最大 token 数
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// HTTP 请求超时 (秒)
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_http_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            organization: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_http_timeout(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("organization", &self.organization)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LlmConfig {
    pub fn provider_type(&self) -> ProviderType {
        ProviderType::from(self.provider.as_str())
    }

    /// 解析 API Key: `DATASAGE_<PROVIDER>_API_KEY` > 配置文件 > `DATASAGE_LLM_API_KEY`
    pub fn resolve_api_key(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        let provider_env = format!("DATASAGE_{}_API_KEY", self.provider.to_uppercase());
        env(&provider_env)
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.trim().is_empty()))
            .or_else(|| env(LLM_API_KEY_ENV).filter(|k| !k.trim().is_empty()))
    }

    /// 构造 Provider 配置；Ollama 之外的 Provider 必须有 API Key
    pub fn to_provider_config(&self) -> Result<ProviderConfig, ConfigError> {
        let provider_type = self.provider_type();
        let api_key = match self.api_key.clone() {
            Some(key) => key,
            None if provider_type == ProviderType::Ollama => String::new(),
            None => {
                return Err(ConfigError::Invalid(format!(
                    "No API key for provider '{}'; set DATASAGE_{}_API_KEY or {}",
                    self.provider,
                    self.provider.to_uppercase(),
                    LLM_API_KEY_ENV
                )));
            }
        };

        Ok(ProviderConfig {
            name: self.provider.clone(),
            provider_type,
            api_key,
            base_url: self.base_url.clone(),
            organization: self.organization.clone(),
            default_model: self.model.clone(),
            timeout_ms: self.timeout * 1000,
        })
    }
}

/// Agent 循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// 单次运行最大迭代数
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// 单次运行墙钟预算 (秒)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// 单次 LLM 调用超时 (秒)
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,

    /// 连续失败上限
    #[serde(default = "default_max_failure_streak")]
    pub max_failure_streak: u32,

    /// 成功摘要中的样本行数
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    /// 执行结果摘要的最大字符数
    #[serde(default = "default_max_observation_chars")]
    pub max_observation_chars: usize,

    /// 仅允许只读查询
    #[serde(default)]
    pub read_only: bool,

    /// 无法确定连接类型时使用的数据库类型
    #[serde(default)]
    pub default_engine: EngineType,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_run_timeout() -> u64 {
    180
}

fn default_llm_timeout() -> u64 {
    30
}

fn default_max_failure_streak() -> u32 {
    3
}

fn default_sample_rows() -> usize {
    3
}

fn default_max_observation_chars() -> usize {
    4000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            run_timeout_secs: default_run_timeout(),
            llm_timeout_secs: default_llm_timeout(),
            max_failure_streak: default_max_failure_streak(),
            sample_rows: default_sample_rows(),
            max_observation_chars: default_max_observation_chars(),
            read_only: false,
            default_engine: EngineType::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 || self.max_iterations > 50 {
            return Err("agent.max_iterations must be between 1 and 50".to_string());
        }
        if self.run_timeout_secs == 0 || self.run_timeout_secs > 3600 {
            return Err("agent.run_timeout_secs must be between 1 and 3600".to_string());
        }
        if self.llm_timeout_secs == 0 || self.llm_timeout_secs > 600 {
            return Err("agent.llm_timeout_secs must be between 1 and 600".to_string());
        }
        if self.max_failure_streak == 0 || self.max_failure_streak > 10 {
            return Err("agent.max_failure_streak must be between 1 and 10".to_string());
        }
        if self.sample_rows > 10 {
            return Err("agent.sample_rows must be at most 10".to_string());
        }
        if self.max_observation_chars < 200 {
            return Err("agent.max_observation_chars must be at least 200".to_string());
        }
        Ok(())
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

/// 查询执行服务配置
#[derive(Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// 远程查询服务地址
    pub base_url: Option<String>,

    /// 访问令牌
    pub api_token: Option<String>,

    /// 查询超时 (秒)
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// 连接超时 (秒)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_query_timeout() -> u64 {
    120
}

fn default_connect_timeout() -> u64 {
    15
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            query_timeout_secs: default_query_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl std::fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// 对话存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 对话目录
    #[serde(default = "default_conversations_dir")]
    pub conversations_dir: PathBuf,

    /// 连接定义文件 (YAML)
    #[serde(default = "default_connections_file")]
    pub connections_file: PathBuf,

    /// 仅使用内存存储
    #[serde(default)]
    pub in_memory: bool,
}

fn default_conversations_dir() -> PathBuf {
    PathBuf::from(".datasage/conversations")
}

fn default_connections_file() -> PathBuf {
    PathBuf::from(".datasage/connections.yaml")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            conversations_dir: default_conversations_dir(),
            connections_file: default_connections_file(),
            in_memory: false,
        }
    }
}

/// 配置加载器
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    explicit: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { explicit: None }
    }

    /// 使用命令行指定的配置文件；文件必须存在
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            explicit: Some(path.into()),
        }
    }

    /// 候选路径: --config > $DATASAGE_CONFIG > ./datasage.yaml > ~/.config/datasage/config.yaml
    pub fn search_paths(&self, env: impl Fn(&str) -> Option<String>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(path) = &self.explicit {
            paths.push(path.clone());
            return paths;
        }
        if let Some(path) = env(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("datasage.yaml"));
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("datasage").join("config.yaml"));
        }
        paths
    }

    /// 从进程环境加载
    pub fn load(&self) -> Result<DataSageConfig, ConfigError> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    pub fn load_with_env(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<DataSageConfig, ConfigError> {
        let mut config = match &self.explicit {
            Some(path) => Self::read_file(path)?,
            None => match self.search_paths(&env).into_iter().find(|p| p.is_file()) {
                Some(path) => Self::read_file(&path)?,
                None => {
                    tracing::debug!("No config file found, using defaults");
                    DataSageConfig::default()
                }
            },
        };

        apply_env_overrides(&mut config, &env);
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<DataSageConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        parse_config(&content)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// 解析 YAML 配置；空文件视为默认配置
pub fn parse_config(content: &str) -> Result<DataSageConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(DataSageConfig::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

fn apply_env_overrides(config: &mut DataSageConfig, env: &impl Fn(&str) -> Option<String>) {
    config.llm.api_key = config.llm.resolve_api_key(env);
    if let Some(url) = env(EXECUTOR_URL_ENV).filter(|u| !u.trim().is_empty()) {
        config.executor.base_url = Some(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DataSageConfig::default();
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.run_timeout(), Duration::from_secs(180));
        assert_eq!(config.agent.llm_timeout(), Duration::from_secs(30));
        assert_eq!(config.agent.max_failure_streak, 3);
        assert_eq!(config.agent.sample_rows, 3);
        assert_eq!(config.agent.default_engine, EngineType::MySql);
        assert_eq!(config.executor.query_timeout_secs, 120);
        assert_eq!(config.executor.connect_timeout_secs, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
llm:
  provider: anthropic
  model: claude-sonnet-4-20250514
agent:
  max_iterations: 5
  read_only: true
  default_engine: postgresql
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.llm.provider_type(), ProviderType::Anthropic);
        assert_eq!(config.llm.temperature, 0.1);
        assert_eq!(config.agent.max_iterations, 5);
        assert!(config.agent.read_only);
        assert_eq!(config.agent.default_engine, EngineType::PostgreSql);
        assert_eq!(config.agent.run_timeout_secs, 180);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = parse_config("  \n").unwrap();
        assert_eq!(config.llm.model, "gpt-4o");
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut agent = AgentConfig::default();
        agent.max_iterations = 0;
        assert!(agent.validate().is_err());

        let mut agent = AgentConfig::default();
        agent.sample_rows = 50;
        assert!(agent.validate().is_err());

        let mut agent = AgentConfig::default();
        agent.llm_timeout_secs = 0;
        assert!(agent.validate().is_err());
    }

    #[test]
    fn test_api_key_precedence() {
        let mut llm = LlmConfig::default();
        llm.api_key = Some("from-file".to_string());

        let env = env_from(&[
            ("DATASAGE_OPENAI_API_KEY", "provider-key"),
            ("DATASAGE_LLM_API_KEY", "generic-key"),
        ]);
        assert_eq!(llm.resolve_api_key(&env).as_deref(), Some("provider-key"));

        let env = env_from(&[("DATASAGE_LLM_API_KEY", "generic-key")]);
        assert_eq!(llm.resolve_api_key(&env).as_deref(), Some("from-file"));

        llm.api_key = None;
        assert_eq!(llm.resolve_api_key(&env).as_deref(), Some("generic-key"));

        let env = env_from(&[]);
        assert_eq!(llm.resolve_api_key(&env), None);
    }

    #[test]
    fn test_load_explicit_file_with_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datasage.yaml");
        std::fs::write(
            &path,
            "llm:\n  provider: anthropic\nexecutor:\n  base_url: http://file.local\n",
        )
        .unwrap();

        let env = env_from(&[
            ("DATASAGE_ANTHROPIC_API_KEY", "sk-ant"),
            ("DATASAGE_EXECUTOR_URL", "http://env.local"),
        ]);
        let config = ConfigLoader::with_path(&path).load_with_env(env).unwrap();

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.executor.base_url.as_deref(), Some("http://env.local"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_path(dir.path().join("missing.yaml"));
        assert!(matches!(
            loader.load_with_env(env_from(&[])),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_explicit_path_shadows_search() {
        let loader = ConfigLoader::with_path("/tmp/x.yaml");
        let paths = loader.search_paths(env_from(&[("DATASAGE_CONFIG", "/etc/other.yaml")]));
        assert_eq!(paths, vec![PathBuf::from("/tmp/x.yaml")]);

        let paths = ConfigLoader::new().search_paths(env_from(&[("DATASAGE_CONFIG", "/etc/other.yaml")]));
        assert_eq!(paths[0], PathBuf::from("/etc/other.yaml"));
        assert_eq!(paths[1], PathBuf::from("datasage.yaml"));
    }

    #[test]
    fn test_provider_config_requires_key() {
        let llm = LlmConfig::default();
        assert!(llm.to_provider_config().is_err());

        let mut llm = LlmConfig::default();
        llm.provider = "ollama".to_string();
        let config = llm.to_provider_config().unwrap();
        assert_eq!(config.provider_type, ProviderType::Ollama);
        assert_eq!(config.timeout_ms, 60_000);
    }
}
