use anyhow::Context;
use splitpage::config::ServerConfig;
use splitpage::server::{build_router, serve, AppState};
use splitpage::store::{MemoryStore, SplitTestStore, SqliteStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env();
    info!(config = ?config, "starting splitpage");

    match &config.database_path {
        Some(path) => {
            let store = SqliteStore::open(path)
                .with_context(|| format!("opening database {}", path.display()))?;
            run(Arc::new(store), &config).await
        }
        None => {
            info!("SPLITPAGE_DATABASE not set; using the in-memory store");
            run(Arc::new(MemoryStore::new()), &config).await
        }
    }
}

async fn run<S: SplitTestStore + 'static>(store: Arc<S>, config: &ServerConfig) -> anyhow::Result<()> {
    let router = build_router(AppState::new(store, config), config.max_body_bytes);
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!("splitpage listening on {}", config.bind_addr);

    serve(listener, router, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    })
    .await
    .context("server failed")
}
