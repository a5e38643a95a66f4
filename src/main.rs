use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kancelaria::channels::telegram::TelegramBot;
use kancelaria::channels::web::{GatewayState, start_server};
use kancelaria::config::Settings;
use kancelaria::db;
use kancelaria::edit::EditSessions;
use kancelaria::notify::{ChangeFeed, NotificationCenter};
use kancelaria::practice::{CaseDirectory, spawn_refresh_loop};
use kancelaria::storage::BlobStore;

#[derive(Parser)]
#[command(name = "kancelaria", version, about = "Case-management backend for an immigration-law practice")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway (default).
    Serve,
    /// Run database migrations and exit.
    Migrate,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kancelaria=debug"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading any configuration.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let settings = Settings::resolve().context("failed to resolve configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            db::connect_from_config(&settings.database)
                .await
                .context("migrations failed")?;
            tracing::info!("migrations applied");
            Ok(())
        }
        Command::Serve => serve(settings).await,
    }
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let db = db::connect_from_config(&settings.database)
        .await
        .context("failed to connect to the database")?;

    let sessions = Arc::new(EditSessions::new());
    let directory = Arc::new(CaseDirectory::new());
    let feed = ChangeFeed::new();
    let notifications = Arc::new(NotificationCenter::new());
    let storage = Arc::new(BlobStore::from_config(&settings.storage));
    let bot = TelegramBot::from_config(&settings.telegram);
    if bot.is_none() {
        tracing::warn!("telegram bot not configured; answers will not be delivered to clients");
    }

    // Fold feed events into the bell-icon notification list.
    {
        let notifications = Arc::clone(&notifications);
        let rx = feed.subscribe();
        tokio::spawn(async move { notifications.run(rx).await });
    }

    // Periodic full-list refresh; rows under edit are left untouched.
    spawn_refresh_loop(
        Arc::clone(&db),
        Arc::clone(&sessions),
        Arc::clone(&directory),
        settings.refresh_interval_secs,
    );

    let state = Arc::new(GatewayState {
        db,
        sessions,
        directory,
        feed,
        notifications,
        storage,
        bot,
        telegram: settings.telegram.clone(),
    });

    start_server(&settings.server, state)
        .await
        .context("failed to start the gateway")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    Ok(())
}
