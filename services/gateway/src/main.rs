mod auth;
mod config;
mod error;
mod handlers;
mod models;
mod rate_limit;
mod router;
mod seed;
mod state;

use config::Config;
use market::{InMemoryCityDirectory, Market};
use persistence::{Journal, JournalConfig, recover};
use router::create_router;
use seed::SeedFile;
use state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use types::commit::{CommitSink, NullSink, StateImage};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting resource market gateway");
    let config = Config::from_env()?;

    let seed = match &config.seed_path {
        Some(path) => SeedFile::load(path)?,
        None => SeedFile::default(),
    };
    let directory = Arc::new(InMemoryCityDirectory::new());
    seed.assign_owners(&directory);

    // Rebuild state from the journal before accepting writes
    let (image, sink, fresh): (StateImage, Arc<dyn CommitSink>, bool) = match &config.journal_dir {
        Some(dir) => {
            let (image, report) = recover(dir)?;
            let journal: Arc<dyn CommitSink> =
                Arc::new(Journal::open(JournalConfig::new(dir.clone()), report.next_sequence())?);
            (image, journal, report.last_sequence == 0)
        }
        None => {
            tracing::warn!("JOURNAL_DIR not set; market state will not survive a restart");
            let sink: Arc<dyn CommitSink> = Arc::new(NullSink);
            (StateImage::default(), sink, true)
        }
    };
    let market = Arc::new(Market::restore(config.market.clone(), directory, sink, image));
    if fresh {
        seed.credit_balances(&market)?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = market.sweeper().spawn(config.market.sweep_interval, shutdown_rx);

    let app = create_router(AppState::new(market, &config.jwt_secret));
    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    sweeper.await?;
    tracing::info!("Gateway stopped");
    Ok(())
}
