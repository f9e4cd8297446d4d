use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ysk_clinic_api::config::Config;
use ysk_clinic_api::db::Database;
use ysk_clinic_api::handlers::AppState;
use ysk_clinic_api::notifications::NotificationManager;
use ysk_clinic_api::routes;

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection.
/// - Notification channels.
/// - Rate limiter sweeper and (optionally) the reminder scheduler.
/// - HTTP routes and middleware (CORS, rate limiting, security headers).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ysk_clinic_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let notifications = Arc::new(NotificationManager::from_config(&config)?);
    tracing::info!("Notification channels initialized");

    let app_state = Arc::new(AppState::new(config.clone(), db.pool.clone(), notifications));

    let _sweeper = app_state
        .rate_limiter
        .spawn_sweeper(config.rate_limit_sweep_interval);

    if config.scheduler_autostart {
        app_state.scheduler.start();
    } else {
        tracing::info!("Reminder scheduler idle (set REMINDER_SCHEDULER_AUTOSTART=true to start at boot)");
    }

    // Outer flood guard: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let api = routes::api_routes(&app_state).layer(GovernorLayer {
        config: governor_conf,
    });
    let app = routes::app(Arc::clone(&app_state), api);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await?;

    if app_state.scheduler.is_running() {
        app_state.scheduler.stop();
    }
    tracing::info!("Server stopped");

    Ok(())
}
