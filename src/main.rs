use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use score_watch::calculate::normalize;
use score_watch::config::{log_level, AppConfig};
use score_watch::fetch::{OsuApiClient, ScoreSource};
use score_watch::models::RawResult;
use score_watch::notify::{DiscordSink, NotificationSink, StdoutSink};
use score_watch::render::Renderer;
use score_watch::storage::DedupStore;
use score_watch::sync::{IntervalTicker, PollContext, PollController};

#[derive(Parser)]
#[command(name = "score-watch")]
#[command(about = "Posts new osu! plays of a roster of players to Discord")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "./config.toml")]
    config: PathBuf,

    /// Data directory path (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the roster for new plays
    Poll {
        /// Run a single sweep and exit
        #[arg(long)]
        once: bool,

        /// Run continuously at the computed cadence
        #[arg(long)]
        watch: bool,

        /// Fixed interval (e.g. "90s", "5m") instead of the computed cadence
        #[arg(long)]
        interval: Option<String>,

        /// Print embeds to stdout instead of posting them
        #[arg(long)]
        dry_run: bool,
    },

    /// Debug utilities
    Debug {
        #[command(subcommand)]
        action: DebugAction,
    },
}

#[derive(Subcommand)]
enum DebugAction {
    /// Normalize and render a raw result JSON file
    Render {
        /// Path to fixture
        path: PathBuf,
    },

    /// Show dedup store statistics
    Store,

    /// Show the tick interval for the configured roster
    Cadence,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let file_config = AppConfig::from_file(&cli.config).ok();
    let level = log_level(cli.log_level.as_deref(), file_config.as_ref());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (json_layer, text_layer) = if cli.json_logs {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    tracing::info!("Starting score-watch v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Poll {
            once,
            watch,
            interval,
            dry_run,
        } => {
            if !once && !watch {
                eprintln!("Specify --once or --watch");
                return Ok(());
            }

            let mut config = AppConfig::load(&cli.config)
                .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;
            if let Some(data_dir) = cli.data_dir {
                config.data_dir = data_dir;
            }

            if interval.is_some() {
                config.poll.interval = interval;
            }
            let tick = config.interval().context("Invalid poll interval")?;

            let source = Arc::new(OsuApiClient::new(config.osu_client_config()?)?);
            let context = PollContext::resolve(
                &config.roster,
                source.as_ref(),
                &config.discord.channel_id,
            )
            .await
            .context("Failed to resolve roster")?
            .with_retention(config.storage.retention);

            let store = DedupStore::open(&config.storage_config().database_path())
                .await
                .context("Failed to open dedup store")?;

            let sink: Arc<dyn NotificationSink> = if dry_run {
                Arc::new(StdoutSink)
            } else {
                Arc::new(DiscordSink::new(config.discord_config()?)?)
            };
            tracing::info!(
                "Using {} source and {} sink",
                source.name(),
                sink.name()
            );

            let controller = Arc::new(PollController::new(
                context,
                source,
                store.clone(),
                Renderer::new(config.render_config()),
                sink,
            ));

            if once {
                tracing::info!("Running one sweep...");
                match controller.sweep_once().await {
                    Ok(result) => {
                        println!("\n=== Sweep Results ===");
                        println!("Pairs polled:     {}", result.pairs_polled);
                        println!("Pairs failed:     {}", result.pairs_failed);
                        println!("Results seen:     {}", result.results_seen);
                        println!("Already seen:     {}", result.already_seen);
                        println!("Notified:         {}", result.notifications_sent);
                        println!("Pruned:           {}", result.records_pruned);
                        println!("Duration:         {:?}", result.duration);
                        if dry_run {
                            println!("\n(dry run - nothing posted)");
                        }
                        if !result.errors.is_empty() {
                            println!("\nErrors:");
                            for err in &result.errors {
                                println!("  - {}", err);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Sweep failed: {}", e);
                        store.close().await;
                        return Err(e.into());
                    }
                }
            } else {
                tracing::info!("Running periodic polling (interval: {:?})...", tick);
                let ticker = IntervalTicker::new(tick);
                tokio::select! {
                    _ = controller.clone().run_periodic(ticker) => {}
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Shutting down");
                        controller.cancel().await;
                    }
                }
            }

            store.close().await;
        }
        Commands::Debug { action } => match action {
            DebugAction::Render { path } => {
                let config = load_lenient(&cli.config);
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let raw: RawResult = serde_json::from_str(&contents)?;

                let normalized = normalize(&raw)?;
                let payload = Renderer::new(config.render_config()).render(&normalized)?;
                println!("{}", serde_json::to_string_pretty(&payload)?);
            }
            DebugAction::Store => {
                let mut config = load_lenient(&cli.config);
                if let Some(data_dir) = cli.data_dir {
                    config.data_dir = data_dir;
                }
                let path = config.storage_config().database_path();
                let store = DedupStore::open(&path).await?;
                println!("Dedup store: {}", path.display());
                println!("Records:     {}", store.count().await?);
                store.close().await;
            }
            DebugAction::Cadence => {
                let config = load_lenient(&cli.config);
                let interval = config.interval()?;
                println!("Roster size:       {}", config.roster.len());
                println!(
                    "Requests/sweep:    {}",
                    config.roster.len() * score_watch::GameMode::COUNT
                );
                println!("Tick interval:     {:?}", interval);
            }
        },
    }

    Ok(())
}

/// Config for debug commands, which do not need credentials.
fn load_lenient(path: &Path) -> AppConfig {
    match AppConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Using default config ({}): {}", path.display(), e);
            AppConfig::default()
        }
    }
}
