//! sqlgate_server: standalone REST server for the sqlgate query gateway.
//!
//! Configuration is read from the environment (and `.env`); see
//! [`sqlgate_server::config`].

use std::sync::Arc;

use anyhow::Context;
use sqlgate_core::policy::RegoPolicy;
use sqlgate_core::{QueryGateway, SessionService};
use sqlgate_postgres::PgStores;
use sqlgate_server::config::ServerConfig;
use sqlgate_server::handlers::session::SessionSettings;
use sqlgate_server::router::build_router;
use sqlgate_server::sweeper::SessionSweeper;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlgate_server=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // A policy that does not load is fatal: nothing runs ungoverned.
    let policy = RegoPolicy::load(&config.policy_file, &config.policy_query)?;

    let pool = sqlgate_postgres::connect(&config.database_url, config.max_connections).await?;
    tracing::info!("Connected to database");
    sqlgate_postgres::ensure_unprivileged_login(&pool).await?;

    if config.run_migrations {
        sqlgate_postgres::run_migrations(&pool).await?;
    }

    let stores = PgStores::new(pool, config.statement_timeout);
    let auth = Arc::new(stores.auth);
    let sessions = Arc::new(SessionService::new(auth.clone(), auth));
    let gateway = Arc::new(QueryGateway::new(
        Arc::new(policy),
        Arc::new(stores.executor),
        Arc::new(stores.audit),
    ));

    let sweeper = SessionSweeper::new(Arc::clone(&sessions), config.sweep_interval);
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let settings = SessionSettings {
        ttl: chrono::Duration::from_std(config.session_ttl).context("session TTL out of range")?,
        default_role: config.default_role.clone(),
    };
    let app = build_router(sessions, gateway, settings);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    tracing::info!("sqlgate_server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
