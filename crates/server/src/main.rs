use anyhow::Error as AnyhowError;
use server::{AppState, routes};
use sqlx::Error as SqlxError;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] SqlxError),
    #[error(transparent)]
    Other(#[from] AnyhowError),
}

#[tokio::main]
async fn main() -> Result<(), CoordinatorError> {
    // Load environment variables from `.env` if present so local development
    // picks up port and policy overrides.
    dotenv::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,server={level},services={level},db={level},utils={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string).expect("Failed to create tracing filter");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let state = AppState::new().await?;

    // Automatic reclamation is opt-in: deployments with long-running agents
    // usually sweep manually through the admin endpoint instead.
    if let Some(interval_secs) = std::env::var("FLEET_RECLAIM_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|s| *s > 0)
    {
        let timeout_secs = std::env::var("FLEET_RECLAIM_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(1800);
        let pool = state.db().pool.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                match services::services::reclaim::reclaim_stale(
                    &pool,
                    chrono::Duration::seconds(timeout_secs),
                )
                .await
                {
                    Ok(count) if count > 0 => {
                        tracing::info!("Reclaimed {} stale agents", count);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("Stale-agent sweep failed: {}", e);
                    }
                }
            }
        });
        tracing::info!(
            "Automatic reclamation enabled: every {}s, timeout {}s",
            interval_secs,
            timeout_secs
        );
    }

    let app_router = routes::router(state);

    let port = std::env::var("BACKEND_PORT")
        .or_else(|_| std::env::var("PORT"))
        .ok()
        .and_then(|s| s.trim().parse::<u16>().ok())
        .unwrap_or_else(|| {
            tracing::info!("No PORT environment variable set, using port 0 for auto-assignment");
            0
        });

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    let actual_port = listener.local_addr()?.port();

    tracing::info!("Coordinator running on http://{host}:{actual_port}");

    axum::serve(listener, app_router).await?;
    Ok(())
}
