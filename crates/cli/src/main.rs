use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use repograph_chunker::ChunkingStrategy;
use repograph_indexer::{DaemonConfig, StoreBackend};
use std::path::{Path, PathBuf};

mod commands;

#[derive(Parser)]
#[command(name = "repograph")]
#[command(about = "Incremental knowledge graph of a codebase for LLM context", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Project directory (defaults to current directory)
    #[arg(long, global = true, default_value = ".")]
    path: PathBuf,

    /// Document store ranking backend
    #[arg(long, global = true, value_enum)]
    store: Option<StoreArg>,

    /// JSON file with a daemon configuration; flags override its fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one update pass over the working tree
    Update(UpdateArgs),

    /// Keep the graph current while files change
    Watch(WatchArgs),

    /// Rank graph nodes against a query
    Search(SearchArgs),

    /// Print token-budgeted context for nodes or line refs
    Context(ContextArgs),
}

#[derive(Args, Clone, Default)]
struct PipelineArgs {
    /// Only chunk files with these extensions (default: all)
    #[arg(long, num_args = 1..)]
    chunk_extensions: Vec<String>,

    /// Chunk proposal strategy
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Map `git diff <ref>` onto the graph
    #[arg(long, value_name = "GITREF")]
    diff: Option<String>,

    /// Skip summaries even when a model endpoint is configured
    #[arg(long)]
    no_summaries: bool,
}

#[derive(Args)]
struct UpdateArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Re-derive every annotation regardless of checksums
    #[arg(long)]
    refresh: bool,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct WatchArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Poll interval in milliseconds
    #[arg(long)]
    interval: Option<u64>,

    /// Quiet period in milliseconds after the newest change
    #[arg(long)]
    debounce: Option<u64>,
}

#[derive(Args)]
struct SearchArgs {
    /// Search query
    query: String,

    /// Maximum number of results
    #[arg(long, short = 'n', default_value_t = 10)]
    limit: usize,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ContextArgs {
    /// Node ids or `path:ranges` refs
    #[arg(required = true)]
    refs: Vec<String>,

    /// Token budget per node
    #[arg(long, short = 'b', default_value_t = 2_000)]
    budget: usize,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreArg {
    Lexical,
    Vector,
}

impl From<StoreArg> for StoreBackend {
    fn from(value: StoreArg) -> Self {
        match value {
            StoreArg::Lexical => Self::Lexical,
            StoreArg::Vector => Self::Vector,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    SyntaxTree,
    FixedWindow,
    Generated,
}

impl From<StrategyArg> for ChunkingStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::SyntaxTree => Self::SyntaxTree,
            StrategyArg::FixedWindow => Self::FixedWindow,
            StrategyArg::Generated => Self::Generated,
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<DaemonConfig> {
    let Some(path) = path else {
        return Ok(DaemonConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
}

/// Fold command-line overrides into the loaded configuration
fn apply_overrides(mut config: DaemonConfig, store: Option<StoreArg>, pipeline: &PipelineArgs) -> DaemonConfig {
    if let Some(store) = store {
        config.store = store.into();
    }
    if !pipeline.chunk_extensions.is_empty() {
        config.chunker.extensions = pipeline
            .chunk_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_string())
            .collect();
    }
    if let Some(strategy) = pipeline.strategy {
        config.chunker.strategy = strategy.into();
    }
    if pipeline.diff.is_some() {
        config.diff_ref.clone_from(&pipeline.diff);
    }
    if pipeline.no_summaries {
        config.summarize = false;
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let root = cli
        .path
        .canonicalize()
        .with_context(|| format!("Invalid project path {}", cli.path.display()))?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Update(args) => {
            let config = apply_overrides(config, cli.store, &args.pipeline);
            commands::run_update(&root, config, args.refresh, args.json).await
        }
        Commands::Watch(args) => {
            let mut config = apply_overrides(config, cli.store, &args.pipeline);
            if let Some(interval) = args.interval {
                config.interval_ms = interval;
            }
            if let Some(debounce) = args.debounce {
                config.debounce_ms = debounce;
            }
            commands::run_watch(&root, config).await
        }
        Commands::Search(args) => {
            let config = apply_overrides(config, cli.store, &PipelineArgs::default());
            commands::run_search(&root, config.store, &args.query, args.limit, args.json).await
        }
        Commands::Context(args) => {
            let config = apply_overrides(config, cli.store, &PipelineArgs::default());
            commands::run_context(&root, config.store, &args.refs, args.budget, args.json).await
        }
    }
}
