// Command-line entry point for POI crawl sessions

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use poi_crawler::{
    CheckpointStore, FileCheckpointStore, HttpFetcher, OpenAiBackend, SessionConfig,
    SessionController, SessionDeps, SessionId, SessionState, TracingEventSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "poi-crawl", about = "Crawl a website for points of interest")]
struct Cli {
    /// Directory holding session checkpoints
    #[arg(long, env = "POI_CHECKPOINT_DIR", default_value = ".poi-sessions", global = true)]
    checkpoint_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new session from a seed URL
    Start {
        url: String,

        #[arg(long)]
        max_pages: Option<usize>,

        #[arg(long)]
        max_depth: Option<u32>,

        #[arg(long)]
        max_duration_secs: Option<u64>,

        #[arg(long)]
        min_link_score: Option<u8>,

        /// Follow links to other hosts
        #[arg(long)]
        allow_offsite: bool,

        /// Double-check every candidate with the reasoning backend
        #[arg(long)]
        validate: bool,
    },

    /// Resume a paused or interrupted session
    Resume { session_id: SessionId },

    /// Print the status and results of a checkpointed session
    Show { session_id: SessionId },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,poi_crawler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let store = Arc::new(FileCheckpointStore::new(&cli.checkpoint_dir));

    match cli.command {
        Command::Start {
            url,
            max_pages,
            max_depth,
            max_duration_secs,
            min_link_score,
            allow_offsite,
            validate,
        } => {
            let mut config = SessionConfig::from_env().context("Failed to load configuration")?;
            if let Some(pages) = max_pages {
                config = config.with_max_pages(pages);
            }
            if let Some(depth) = max_depth {
                config = config.with_max_depth(depth);
            }
            if let Some(secs) = max_duration_secs {
                config = config.with_max_duration(Duration::from_secs(secs));
            }
            if let Some(score) = min_link_score {
                config = config.with_min_link_score(score);
            }
            if allow_offsite {
                config = config.allow_offsite();
            }
            if validate {
                config = config.with_poi_validation();
            }

            let deps = build_deps(store, config.fetch_timeout)?;
            let controller = SessionController::start(&url, config, deps)
                .await
                .context("Failed to start session")?;
            println!("Session {}", controller.session_id());
            drive(controller).await
        }
        Command::Resume { session_id } => {
            let state = load(store.as_ref(), session_id).await?;
            let fetch_timeout = state.config.fetch_timeout;
            let mut controller = SessionController::restore(state, build_deps(store, fetch_timeout)?)
                .context("Failed to restore session")?;
            if controller.status() != poi_crawler::SessionStatus::Running {
                controller.resume().context("Session cannot be resumed")?;
            }
            drive(controller).await
        }
        Command::Show { session_id } => {
            let state = load(store.as_ref(), session_id).await?;
            print_report(&state)
        }
    }
}

fn build_deps(store: Arc<FileCheckpointStore>, fetch_timeout: Duration) -> Result<SessionDeps> {
    let fetcher = HttpFetcher::new(fetch_timeout).context("Failed to create HTTP client")?;
    let backend = OpenAiBackend::from_env()?;
    tracing::info!(model = %backend.model(), "Reasoning backend configured");

    Ok(SessionDeps {
        fetcher: Arc::new(fetcher),
        backend: Arc::new(backend),
        store,
        events: Arc::new(TracingEventSink),
    })
}

async fn load(store: &FileCheckpointStore, session_id: SessionId) -> Result<SessionState> {
    match store
        .load(session_id)
        .await
        .with_context(|| format!("Failed to read checkpoint for {session_id}"))?
    {
        Some(state) => Ok(state),
        None => bail!(
            "No checkpoint for session {session_id} in {}",
            store.dir().display()
        ),
    }
}

/// Run until done, pausing (with a checkpoint) on Ctrl-C.
async fn drive(mut controller: SessionController) -> Result<()> {
    let pause = controller.pause_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, pausing after the current page");
            pause.cancel();
        }
    });

    let status = controller.run().await;
    tracing::info!(session_id = %controller.session_id(), ?status, "Session stopped");
    print_report(controller.state())
}

fn print_report(state: &SessionState) -> Result<()> {
    let summary = state.summary();
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to render summary")?
    );
    println!();
    println!("{}", state.ledger.to_markdown_table());
    Ok(())
}
