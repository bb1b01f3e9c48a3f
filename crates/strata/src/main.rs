//! Strata CLI - inspect configuration and drive the context engine from the shell

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use strata::ContextServiceBuilder;
use strata::compression::CompressionOutcome;
use strata::config::Config;
use strata::error::{Result, StrataError};
use strata::memory::{Interaction, InteractionMetadata, MemoryTier, RetrievalSource, SessionId};

/// Strata - tiered conversational-context memory engine
#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Tiered conversational-context memory with embedding-backed compression")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load and validate the configuration, then print the effective settings
    #[command(name = "check-config")]
    CheckConfig,

    /// Feed a JSONL transcript through a session
    Replay {
        /// File with one `{"user_message", "assistant_response"}` object per line
        file: PathBuf,

        #[arg(long)]
        session: String,

        #[arg(long, default_value = "cli")]
        user: String,

        /// Run a compression pass after the replay
        #[arg(long)]
        compress: bool,

        /// Run a relevance query after the replay
        #[arg(long)]
        query: Option<String>,
    },

    /// Print the context digest of a persisted session
    Context {
        #[arg(long)]
        session: String,
    },
}

/// One line of a replay transcript
#[derive(Debug, Deserialize)]
struct ReplayTurn {
    user_message: String,
    assistant_response: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Option<InteractionMetadata>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!("Config loaded: {:?}", config);

    match cli.command {
        Command::CheckConfig => check_config(&config),
        Command::Replay {
            file,
            session,
            user,
            compress,
            query,
        } => replay(config, &file, &session, &user, compress, query.as_deref()).await,
        Command::Context { session } => context(config, &session).await,
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,strata=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_session(raw: &str) -> Result<SessionId> {
    SessionId::try_from(raw)
        .map_err(|e| StrataError::Configuration(format!("Invalid session '{raw}': {e}")))
}

fn check_config(config: &Config) -> Result<()> {
    println!("Configuration OK");
    println!(
        "  tiers:       hot_max={} warm_max={} warm_ttl={}s cold_sample={} strict={}",
        config.tiers.hot_max,
        config.tiers.warm_max,
        config.tiers.warm_ttl_secs,
        config.tiers.cold_sample_limit,
        config.tiers.strict_sessions
    );
    println!(
        "  compression: threshold={} dimension={} ttl={}d scan_limit={}",
        config.tiers.compression_threshold(),
        config.compression.embedding_dimension,
        config.compression.ttl_days,
        config.compression.scan_limit
    );
    println!(
        "  metrics:     cost_tracking={} cost_per_million={} bytes_per_interaction={}",
        config.metrics.cost_tracking_enabled,
        config.metrics.cost_per_million_tokens,
        config.metrics.bytes_per_interaction
    );
    println!(
        "  stores:      timeout={}ms cache_capacity={} data_dir={}",
        config.stores.timeout_ms,
        config.stores.cache_capacity,
        config.stores.data_dir.display()
    );
    println!(
        "  embedding:   provider={} model={} top_k={}",
        config.embedding.provider, config.embedding.model, config.embedding.top_k
    );
    Ok(())
}

async fn read_transcript(file: &Path) -> Result<Vec<ReplayTurn>> {
    let content = tokio::fs::read_to_string(file).await.map_err(|e| {
        StrataError::Storage(format!("Failed to read {}: {}", file.display(), e))
    })?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<ReplayTurn>(line).map_err(|e| {
                StrataError::Serialization(format!("{}:{}: {}", file.display(), n + 1, e))
            })
        })
        .collect()
}

async fn replay(
    config: Config,
    file: &Path,
    session: &str,
    user: &str,
    compress: bool,
    query: Option<&str>,
) -> Result<()> {
    let session = parse_session(session)?;
    let turns = read_transcript(file).await?;
    let service = ContextServiceBuilder::new(config).build().await?;

    service.initialize(&session, user).await;

    let total = turns.len();
    for turn in turns {
        let mut interaction = Interaction::new(
            session.clone(),
            turn.user_id.unwrap_or_else(|| user.to_string()),
            turn.user_message,
            turn.assistant_response,
        );
        if let Some(timestamp) = turn.timestamp {
            interaction = interaction.with_timestamp(timestamp);
        }
        if let Some(metadata) = turn.metadata {
            interaction = interaction.with_metadata(metadata);
        }
        service.add_interaction(&session, interaction).await?;
    }
    println!("Replayed {total} interactions into session {session}");

    if compress {
        match service.compress(&session).await {
            CompressionOutcome::Compressed {
                candidates,
                summary_id,
            } => println!("Compressed {candidates} interactions into summary {summary_id}"),
            CompressionOutcome::NotNeeded { interactions } => {
                println!("Compression not needed ({interactions} interactions)")
            }
            CompressionOutcome::Deferred { reason } => println!("Compression deferred: {reason}"),
        }
    }

    if let Some(query) = query {
        let relevant = service.retrieve_relevant(&session, query).await;
        let source = match relevant.source {
            RetrievalSource::Semantic => "semantic",
            RetrievalSource::Recency => "recency",
        };
        println!(
            "Query matched {} summaries and {} interactions ({source})",
            relevant.summaries.len(),
            relevant.interactions.len()
        );
        for hit in &relevant.summaries {
            println!("  [{:.3}] {}", hit.score, first_line(&hit.summary.text));
        }
    }

    println!("{}", service.get_context_summary(&session).await);
    if let Some(metrics) = service.metrics(&session) {
        let json = serde_json::to_string_pretty(&metrics)?;
        println!("{json}");
    }

    service.cleanup(&session).await;
    let unflushed = service.pending_writes(&session).await;
    if unflushed > 0 {
        return Err(StrataError::Persistence(format!(
            "{unflushed} interaction(s) for session {session} could not be flushed"
        )));
    }
    Ok(())
}

async fn context(config: Config, session: &str) -> Result<()> {
    let session = parse_session(session)?;
    let service = ContextServiceBuilder::new(config).build().await?;
    let view = service.get_context(&session).await;
    println!("{}", service.get_context_summary(&session).await);
    for tier in MemoryTier::ALL {
        println!("  {:<9} {}", tier.to_string(), view.tier_len(tier));
    }
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
