use gatekeeper_api::{
    AppState, BcryptHasher,
    config::{AppConfig, Env},
    create_app,
    repository::{InMemoryRepository, PostgresRepository, RepositoryState},
    routes::build_router,
    tokens::REFRESH_PURGE_INTERVAL_SECS,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Process bootstrap: configuration, logging, the token store, route registration
/// and the HTTP server, in that order. Nothing accepts traffic until the route
/// table is complete.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast in production)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins, otherwise sensible development defaults.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gatekeeper_api=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            // JSON lines for log aggregation.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Persistence: Postgres when configured, in-memory otherwise (local only).
    let repo: RepositoryState = match &config.db_url {
        Some(db_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await
                .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");
            let postgres = PostgresRepository::new(pool);
            if config.env == Env::Local {
                postgres
                    .ensure_schema()
                    .await
                    .expect("FATAL: Failed to create local schema.");
            }
            Arc::new(postgres)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; sessions are kept in memory and lost on restart");
            Arc::new(InMemoryRepository::new())
        }
    };

    // 4. Unified state and route table
    let hasher = Arc::new(BcryptHasher::new(config.bcrypt_cost));
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, repo, hasher);
    let router = build_router(state).expect("FATAL: Route table is invalid.");

    // 5. Background sweep of expired refresh tokens; the first tick runs immediately.
    let tokens = router.state().tokens.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(REFRESH_PURGE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(e) = tokens.purge_expired().await {
                tracing::error!(error = %e, "refresh token purge failed");
            }
        }
    });

    // 6. HTTP server
    let app = create_app(router);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind listen address. Check BIND_ADDR.");

    tracing::info!("Listening on {}", bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server terminated");
    }
}
