use anyhow::Context;
use duochat::{auth::Clients, app, db, AppState, Config};
use tower_sessions::MemoryStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("duochat=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let db_pool = db::connect(&config.database_url).await?;

    let client_secret = std::fs::read_to_string(&config.client_secret_path)
        .with_context(|| format!("reading OAuth keys from {}", config.client_secret_path))?;
    let clients = Clients::from_json(serde_json::from_str(&client_secret)?, &config)
        .map_err(|e| e.0)?;

    let bind_addr = config.bind_addr.clone();
    let app = app(AppState::new(db_pool, clients, config), MemoryStore::default());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("listening on {bind_addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
