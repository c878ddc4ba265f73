mod auth;
mod config;
mod middleware;

mod db;
mod error;
mod models;
mod routes;
mod services;
mod workers;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::{config::Config, models::AppState};
use crate::workers::dispatcher::{Dispatcher, LogSender};
use crate::workers::sweeper::Sweeper;

use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, cfg.db_max_connections).await?;

    if cfg.run_migrations {
        db::migrate(&pool).await?;
        tracing::info!("migrations applied");
    }

    // Background workers share one shutdown signal with the HTTP server.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = Sweeper::new(
        pool.clone(),
        cfg.sweep_interval,
        chrono::Duration::hours(cfg.reservation_ttl_hours),
    );
    let dispatcher = Dispatcher::new(
        pool.clone(),
        Arc::new(LogSender),
        cfg.dispatch_interval,
        cfg.dispatch_batch_size,
        cfg.notification_max_attempts,
    );
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx.clone()));
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx));

    let state = AppState { db: pool };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let (sweeper_res, dispatcher_res) = tokio::join!(sweeper_handle, dispatcher_handle);
    for (name, res) in [("sweeper", sweeper_res), ("dispatcher", dispatcher_res)] {
        if let Err(e) = res {
            tracing::error!(worker = name, error = %e, "worker task ended abnormally");
        }
    }
    tracing::info!("workers stopped");
    Ok(())
}
