use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use agenda_api::config;
use agenda_api::routes;
use agenda_api::store::PgStore;
use agenda_api::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::config();
    info!("starting agenda-api ({:?})", config.environment);

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let store = PgStore::connect(&database_url).await?;
    store.migrate().await?;
    info!("database connected and migrations applied");

    let state = AppState::new(Arc::new(store));
    let app = routes::app(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}
