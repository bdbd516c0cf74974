use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use log::info;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use govserver::api_router::configure_api_routes;
use govserver::core::config::AppConfig;
use govserver::core::shared::state::AppState;
use govserver::core::shared::utils::{create_conn, run_migrations};
use govserver::outbox::{EmailNotifier, LogNotifier, Notifier, OutboxDrainer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = AppConfig::from_env()?;
    let pool = create_conn(&config.database_url).context("failed to create database pool")?;
    run_migrations(&pool).map_err(|e| anyhow::anyhow!("migrations failed: {e}"))?;

    let notifier: Arc<dyn Notifier> = if config.email.enabled {
        Arc::new(EmailNotifier::new(&config.email)?)
    } else {
        Arc::new(LogNotifier)
    };
    OutboxDrainer::new(pool.clone(), notifier, config.outbox.clone()).spawn();

    let state = Arc::new(AppState {
        conn: pool,
        config: config.clone(),
    });

    let app = configure_api_routes()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
