mod agent;
mod config;
mod db;
mod embeddings;
mod error;
mod llm;
mod models;
mod poller;
mod services;
mod slack;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::agent::{startup_notice, Agent, AgentMemory};
use crate::config::Config;
use crate::db::Database;
use crate::embeddings::EmbeddingProvider;
use crate::llm::LlmProvider;
use crate::poller::Poller;
use crate::services::{ContextAssembler, MemoryService};
use crate::slack::{ConversationClient, SlackAuth, SlackClient};

#[derive(Parser)]
#[command(name = "curator")]
#[command(about = "Slack workspace agent with polling event detection and memory recall")]
struct Args {
    /// Handle to answer to in channels (overrides CURATOR_HANDLE)
    #[arg(long)]
    handle: Option<String>,

    /// Extra system prompt for the response generator
    #[arg(long)]
    system_prompt: Option<String>,

    /// Poll interval in seconds (overrides POLL_INTERVAL_SECS)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Disable the memory index entirely
    #[arg(long)]
    no_memory: bool,

    /// Wipe the memory index before starting
    #[arg(long)]
    reset_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "curator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env();
    if let Some(handle) = args.handle {
        config.slack.handle = handle;
    }
    if let Some(interval) = args.poll_interval {
        config.poller.poll_interval_secs = interval;
    }

    // Authentication is fatal: the process must not begin polling with
    // bad credentials.
    let auth = SlackAuth::new(
        config.slack.token.clone().unwrap_or_default(),
        config.slack.cookie.clone(),
    )?;
    let client = Arc::new(SlackClient::new(auth, &config.poller)?);

    let identity = client.auth_test().await?;
    tracing::info!(
        user = %identity.user_name,
        team = %identity.team,
        "Connected to Slack"
    );

    // Startup notice is best-effort.
    let notice = startup_notice(&config.slack.handle, &identity.user_name);
    if let Err(error) = client.send_dm(&identity.user_id, &notice).await {
        tracing::warn!(%error, "Could not send startup notice");
    }

    let memory = if args.no_memory {
        tracing::info!("Memory index disabled by flag");
        None
    } else {
        match init_memory(&config, args.reset_memory).await {
            Ok(memory) => Some(memory),
            Err(error) => {
                tracing::warn!(%error, "Could not initialize memory index; running without memory");
                None
            }
        }
    };

    if config.llm.is_none() {
        tracing::warn!("LLM_MODEL is not set; replies will be a static notice");
    }
    let llm = LlmProvider::new(config.llm.as_ref());

    let mut poller = Poller::new(
        Arc::clone(&client) as Arc<dyn ConversationClient>,
        &identity,
        &config.slack.handle,
        config.poller.clone(),
    )?;
    poller.initialize().await?;
    let poller_handle = poller.handle();

    tracing::info!(
        handle = %config.slack.handle,
        interval_secs = config.poller.poll_interval_secs,
        "Starting poll loop"
    );

    let cancel_token = CancellationToken::new();
    let (tx, rx) = mpsc::channel(config.poller.event_buffer);

    let poller_task = tokio::spawn(poller.run(tx, cancel_token.child_token()));

    let agent = Agent::new(
        Arc::clone(&client) as Arc<dyn ConversationClient>,
        llm,
        memory,
        poller_handle,
        args.system_prompt,
    );
    let agent_cancel = cancel_token.child_token();
    let agent_task = tokio::spawn(async move { agent.run(rx, agent_cancel).await });

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, cancelling background tasks...");
    cancel_token.cancel();

    let _ = poller_task.await;
    let _ = agent_task.await;

    Ok(())
}

/// Bring up the embedding model and the vector store.
async fn init_memory(config: &Config, reset: bool) -> error::Result<AgentMemory> {
    tracing::info!("Loading embedding model: {}...", config.embeddings.model);
    let embeddings = EmbeddingProvider::new(&config.embeddings)?;

    let db = Database::new(&config.database, embeddings.dimensions()).await?;
    let service = Arc::new(MemoryService::new(db, Arc::new(embeddings)));

    if reset {
        service.reset().await?;
    }
    service.ensure_dimensions().await?;
    tracing::info!(records = service.count().await?, "Memory index ready");

    let assembler = ContextAssembler::new(Arc::clone(&service), &config.context);
    Ok(AgentMemory { service, assembler })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
