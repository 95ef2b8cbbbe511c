use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use skippy_core::config::SkippyConfig;
use skippy_core::paths;
use skippy_discord::egress::DiscordEgress;
use skippy_memory::MemoryStore;
use skippy_scheduler::{CronStore, SchedulerEngine};

mod app;

use app::AppState;

#[derive(Parser)]
#[command(name = "skippyd", about = "Skippy personal-assistant daemon")]
struct Args {
    /// Config file path (default: ~/.Skippy/Skippy.json)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Startup preconditions: data dir and config must exist. Exit 1 on
    // failure, before anything else is touched.
    if !paths::data_root().is_dir() {
        eprintln!("data directory missing: {}", paths::data_root().display());
        std::process::exit(1);
    }
    let config = match SkippyConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config.log_level);

    if let Err(e) = run(config).await {
        error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

/// Console gets ANSI color; the file log at ~/.Skippy/Skippy.log is plain.
/// Both carry file:line caller capture.
fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_level.into());

    let console = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_file(true)
        .with_line_number(true);

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths::log_file())
    {
        Ok(file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .with_writer(Arc::new(file));
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file_layer)
                .init();
        }
        Err(e) => {
            tracing_subscriber::registry().with(filter).with(console).init();
            tracing::warn!(error = %e, "file log unavailable; console only");
        }
    }
}

async fn run(config: SkippyConfig) -> anyhow::Result<()> {
    paths::ensure_memory_dir()?;
    let memory = Arc::new(MemoryStore::open(&paths::memory_db())?);
    let cron = Arc::new(CronStore::open(&paths::cron_db())?);

    // The HTTP half of the Discord connection stands alone, so tool egress
    // works before (and independent of) the gateway task.
    let http = Arc::new(serenity::http::Http::new(&config.discord.token));
    let guild_id = serenity::model::id::GuildId::new(
        config.discord.guild_id.parse().unwrap_or(1),
    );
    let egress = Arc::new(DiscordEgress::new(Arc::clone(&http), guild_id));

    let state = Arc::new(AppState::new(config, memory, Arc::clone(&cron), egress));

    // Startup caches: tool init, condensed tool context, context window.
    state.initialize().await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let gateway = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = skippy_discord::run(state).await {
                error!(error = %e, "Discord gateway stopped");
            }
        })
    };

    let ipc = {
        let state = Arc::clone(&state);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = skippy_ipc::run(state, paths::socket_file(), rx).await {
                error!(error = %e, "IPC server stopped");
            }
        })
    };

    let scheduler = {
        let sink: Arc<dyn skippy_scheduler::JobSink> = state.clone();
        let engine = SchedulerEngine::new(state.cron_store(), sink);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            engine.run(rx).await;
        })
    };

    info!("Skippy daemon running");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    // Stop accepting IPC, stop the scheduler; in-flight chains finish on
    // their own tasks with no hard deadline.
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(ipc, scheduler);
    gateway.abort();
    skippy_ipc::server::cleanup_socket(&paths::socket_file());

    info!("Skippy daemon stopped");
    Ok(())
}
