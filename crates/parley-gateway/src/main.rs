use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parley_agent::{AgentClient, HttpAgentClient, NullAgent};
use parley_channels::{Channel, LogChannel, WhatsAppChannel};
use parley_core::config::{ParleyConfig, StoreBackend};
use parley_engine::{run_proactive_worker, Engine, ProactiveQueue};
use parley_sessions::ConversationStore;
use parley_store::{MemoryStore, SqliteStore, TtlStore};
use tokio::sync::watch;
use tracing::{info, warn};

mod app;
mod http;

/// How often expired coordination keys are purged.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "parley-gateway", version, about = "Message coordination gateway")]
struct Args {
    /// Path to parley.toml (default: ~/.parley/parley.toml).
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parley_gateway=info,parley_engine=info,tower_http=debug".into()
            }),
        )
        .init();

    let args = Args::parse();
    let config = ParleyConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        ParleyConfig::default()
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // relational store: conversations and message history
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let conversations = Arc::new(ConversationStore::new(db)?);

    let store = build_store(&config, shutdown_rx.clone())?;
    let store_backend = store.backend().to_string();
    let channel = build_channel(&config)?;
    let agent = build_agent(&config)?;

    let (engine, fired_rx) = Engine::new(
        &config.coordination,
        store,
        conversations,
        agent,
        Arc::clone(&channel),
    );
    let engine = Arc::new(engine);
    tokio::spawn(Arc::clone(&engine).run(fired_rx, shutdown_rx.clone()));

    let (proactive, proactive_rx) = ProactiveQueue::new(config.proactive.queue_capacity);
    tokio::spawn(run_proactive_worker(
        proactive_rx,
        Arc::clone(engine.resolver()),
        channel,
    ));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, engine, proactive, store_backend));
    let router = app::build_router(state);

    info!("Parley gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await?;

    // stop the hand-off loop and the sweeper
    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Open the coordination store and start its expiry sweeper.
fn build_store(
    config: &ParleyConfig,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Arc<dyn TtlStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            let sweeper = Arc::clone(&store);
            spawn_sweeper(shutdown, move || Ok(sweeper.sweep_expired()));
            info!("coordination store: in-process memory");
            Ok(store)
        }
        StoreBackend::Sqlite => {
            ensure_parent_dir(&config.store.path);
            let store = Arc::new(SqliteStore::open(&config.store.path)?);
            let sweeper = Arc::clone(&store);
            spawn_sweeper(shutdown, move || sweeper.sweep_expired());
            info!(path = %config.store.path, "coordination store: sqlite");
            Ok(store)
        }
    }
}

fn spawn_sweeper<F>(mut shutdown: watch::Receiver<bool>, sweep: F)
where
    F: Fn() -> parley_store::Result<usize> + Send + 'static,
{
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => match sweep() {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!(purged = n, "expired coordination keys purged"),
                    Err(e) => warn!(error = %e, "coordination store sweep failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

fn build_channel(config: &ParleyConfig) -> anyhow::Result<Arc<dyn Channel>> {
    match &config.channels.whatsapp {
        Some(whatsapp) => {
            let channel = WhatsAppChannel::new(whatsapp)?;
            info!(phone_number_id = %whatsapp.phone_number_id, "WhatsApp channel enabled");
            Ok(Arc::new(channel))
        }
        None => {
            warn!("No channel configured; outbound messages are only logged");
            Ok(Arc::new(LogChannel))
        }
    }
}

fn build_agent(config: &ParleyConfig) -> anyhow::Result<Arc<dyn AgentClient>> {
    match &config.agent.base_url {
        Some(base_url) => {
            let client = HttpAgentClient::new(
                base_url,
                &config.agent.path,
                Duration::from_secs(config.agent.timeout_secs),
            )?;
            info!(url = %client.url(), "agent service configured");
            Ok(Arc::new(client))
        }
        None => {
            warn!("No agent service configured; every turn gets the fallback message");
            Ok(Arc::new(NullAgent))
        }
    }
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
