//! CLI - Command Line Interface
//!
//! Available Commands:
//! - datasage ask "question" -C <connection>   - Generate (and optionally run) SQL
//! - datasage history <id>                      - Show a saved conversation
//! - datasage conversations                     - List saved conversations
//! - datasage delete <id>                       - Delete a saved conversation
//! - datasage schema -C <connection>            - Print the schema the model sees

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use datasage_core::config::StorageConfig;
use datasage_core::llm::create_provider;
use datasage_core::{
    ConfigError, ConfigLoader, ConnectionRef, ConnectionResolver, DataSageConfig, QueryExecutor,
    SchemaProvider, SchemaScope,
};
use datasage_persistence::{
    ConversationRecord, JsonConversationStore, MemoryConversationStore, SharedConversationStore,
    StorageError,
};
use datasage_runtime::{AgentError, AgentRequest, GenerationSettings, SqlAgent};

use crate::connections::ConnectionsFile;
use crate::remote::{HttpQueryExecutor, HttpSchemaProvider, RemoteService};
use crate::render;

/// CLI Errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connections file error: {0}")]
    Connections(String),

    #[error("Query service error: {0}")]
    Service(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

/// DataSage CLI
#[derive(Parser, Debug)]
#[command(name = "datasage")]
#[command(author, version, about = "Natural language to SQL", long_about = None)]
pub(crate) struct Cli {
    /// Config file (defaults: $DATASAGE_CONFIG, ./datasage.yaml, ~/.config/datasage/config.yaml)
    #[arg(short, long, global = true, env = "DATASAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Turn a question into SQL
    Ask(AskArgs),

    /// Show a saved conversation
    History {
        /// Conversation ID
        id: String,
    },

    /// List saved conversations, newest first
    Conversations {
        /// Only conversations of this notebook
        #[arg(short, long)]
        notebook: Option<String>,
    },

    /// Delete a saved conversation
    Delete {
        /// Conversation ID
        id: String,
    },

    /// Print the schema text the model receives
    Schema(SchemaArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub(crate) struct ScopeArgs {
    /// Focus on this schema (repeatable)
    #[arg(long = "schema-hint")]
    pub schemas: Vec<String>,

    /// Focus on this table, `table` or `schema.table` (repeatable)
    #[arg(long = "table")]
    pub tables: Vec<String>,
}

impl ScopeArgs {
    pub fn to_scope(&self) -> Option<SchemaScope> {
        let scope = SchemaScope {
            schemas: self.schemas.clone(),
            tables: self.tables.clone(),
        };
        (!scope.is_empty()).then_some(scope)
    }
}

#[derive(Args, Debug)]
pub(crate) struct AskArgs {
    /// The question, in natural language
    pub request: String,

    /// Connection ID from the connections file
    #[arg(short = 'C', long)]
    pub connection: String,

    /// Notebook the request belongs to
    #[arg(short, long, default_value = "")]
    pub notebook: String,

    /// Continue this conversation
    #[arg(short = 'i', long)]
    pub conversation: Option<String>,

    /// Execute the final SQL and print its rows
    #[arg(short, long)]
    pub run: bool,

    /// Reject anything but read-only statements
    #[arg(long)]
    pub read_only: bool,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

#[derive(Args, Debug)]
pub(crate) struct SchemaArgs {
    /// Connection ID from the connections file
    #[arg(short = 'C', long)]
    pub connection: String,

    /// Notebook used for access checks
    #[arg(short, long, default_value = "")]
    pub notebook: String,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

/// Install the stderr subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Parse CLI arguments and execute commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(cli).await?;
    Ok(())
}

pub(crate) async fn run(cli: Cli) -> Result<(), CliError> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load()?;
    let output = cli.output;

    match cli.command {
        Commands::Ask(args) => cmd_ask(args, config, output).await,
        Commands::History { id } => {
            let store = open_store(&config.storage).await?;
            cmd_history(&store, &id, output).await
        }
        Commands::Conversations { notebook } => {
            let store = open_store(&config.storage).await?;
            cmd_conversations(&store, notebook.as_deref(), output).await
        }
        Commands::Delete { id } => {
            let store = open_store(&config.storage).await?;
            if !store.delete(&id).await? {
                return Err(CliError::NotFound(format!("conversation {}", id)));
            }
            println!("Deleted conversation {}", id);
            Ok(())
        }
        Commands::Schema(args) => cmd_schema(args, config, output).await,
    }
}

pub(crate) async fn open_store(config: &StorageConfig) -> Result<SharedConversationStore, CliError> {
    if config.in_memory {
        return Ok(Arc::new(MemoryConversationStore::new()));
    }
    Ok(Arc::new(JsonConversationStore::new(&config.conversations_dir).await?))
}

fn load_resolver(config: &DataSageConfig) -> Result<Arc<dyn ConnectionResolver>, CliError> {
    let file = ConnectionsFile::load(&config.storage.connections_file)?;
    info!(connections = file.connections.len(), "Loaded connection definitions");
    Ok(Arc::new(file.into_resolver()))
}

async fn cmd_ask(args: AskArgs, mut config: DataSageConfig, output: OutputFormat) -> Result<(), CliError> {
    if args.read_only {
        config.agent.read_only = true;
    }

    let resolver = load_resolver(&config)?;
    let service = RemoteService::from_config(&config.executor).map_err(CliError::Service)?;
    let executor: Arc<dyn QueryExecutor> = Arc::new(HttpQueryExecutor::new(service.clone()));
    let schema: Arc<dyn SchemaProvider> = Arc::new(HttpSchemaProvider::new(service));
    let agent = build_agent(&config, executor.clone(), schema, resolver.clone())?;

    let store = open_store(&config.storage).await?;
    let mut record = match &args.conversation {
        Some(id) => store
            .load(id)
            .await?
            .ok_or_else(|| CliError::NotFound(format!("conversation {}", id)))?,
        None => ConversationRecord::new(args.notebook.clone(), &args.request),
    };

    let request = AgentRequest {
        user_request: args.request.clone(),
        connection: ConnectionRef::Id(args.connection.clone()),
        notebook_id: args.notebook.clone(),
        conversation_id: Some(record.id.clone()),
        prior_conversation: record.messages.clone(),
        scope: args.scope.to_scope(),
    };
    let response = agent.run(request).await?;

    record.replace_messages(response.conversation.clone());
    store.save(&record).await?;

    let rows = match (&response.final_sql, args.run) {
        (Some(sql), true) => {
            let connection = resolver
                .resolve(&args.connection, &args.notebook)
                .await
                .map_err(|e| CliError::NotFound(e.to_string()))?;
            Some(
                executor
                    .execute(&connection, sql)
                    .await
                    .map_err(|e| CliError::Service(e.to_string()))?,
            )
        }
        _ => None,
    };

    match output {
        OutputFormat::Json => {
            let value = serde_json::json!({ "response": response, "result": rows });
            println!("{}", render::render_json(&value)?);
        }
        OutputFormat::Pretty => {
            print!("{}", render::render_response(&response));
            if let Some(rows) = &rows {
                println!();
                print!("{}", render::render_table(rows));
            }
        }
    }
    Ok(())
}

/// Agent wired from the config: model parameters from `llm`, query timeout from `executor`.
pub(crate) fn build_agent(
    config: &DataSageConfig,
    executor: Arc<dyn QueryExecutor>,
    schema: Arc<dyn SchemaProvider>,
    resolver: Arc<dyn ConnectionResolver>,
) -> Result<SqlAgent, CliError> {
    let provider = create_provider(&config.llm)?;
    Ok(SqlAgent::new(provider, executor, schema, config.agent.clone())?
        .with_resolver(resolver)
        .with_generation(GenerationSettings {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            ..GenerationSettings::default()
        })
        .with_query_timeout(Duration::from_secs(config.executor.query_timeout_secs)))
}

pub(crate) async fn cmd_history(
    store: &SharedConversationStore,
    id: &str,
    output: OutputFormat,
) -> Result<(), CliError> {
    let record = store
        .load(id)
        .await?
        .ok_or_else(|| CliError::NotFound(format!("conversation {}", id)))?;

    match output {
        OutputFormat::Json => println!("{}", render::render_json(&record)?),
        OutputFormat::Pretty => {
            println!("{} ({})\n", record.title, record.id);
            print!("{}", render::render_conversation(&record.messages));
        }
    }
    Ok(())
}

pub(crate) async fn cmd_conversations(
    store: &SharedConversationStore,
    notebook: Option<&str>,
    output: OutputFormat,
) -> Result<(), CliError> {
    let summaries = store.list(notebook).await?;
    match output {
        OutputFormat::Json => println!("{}", render::render_json(&summaries)?),
        OutputFormat::Pretty => print!("{}", render::render_summaries(&summaries)),
    }
    Ok(())
}

async fn cmd_schema(args: SchemaArgs, config: DataSageConfig, output: OutputFormat) -> Result<(), CliError> {
    let resolver = load_resolver(&config)?;
    let connection = resolver
        .resolve(&args.connection, &args.notebook)
        .await
        .map_err(|e| CliError::NotFound(e.to_string()))?;

    let service = RemoteService::from_config(&config.executor).map_err(CliError::Service)?;
    let schema = HttpSchemaProvider::new(service)
        .fetch_schema(&connection)
        .await
        .map_err(|e| CliError::Service(e.to_string()))?;

    let scope = args.scope.to_scope();
    match output {
        OutputFormat::Json => {
            let scoped = match &scope {
                Some(scope) => schema.scoped(scope),
                None => schema,
            };
            println!("{}", render::render_json(&scoped)?);
        }
        OutputFormat::Pretty => println!("{}", schema.format_for_prompt(scope.as_ref())),
    }
    Ok(())
}
