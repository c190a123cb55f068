use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use klickauktion::{
    abuse::AbuseConfig, api, auth, botdetect::BotConfig, janitor, state::AppState,
    stats::{FileBackend, StatsBackend},
    types::GameConfig,
    ws,
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "klickauktion=debug,tower_http=debug,axum=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Klickauktion...");

    let game_config = GameConfig::from_env();
    let abuse_config = AbuseConfig::from_env();
    let bot_config = BotConfig::from_env();
    let host_auth = auth::HostAuthConfig::from_env();

    let stats_path =
        std::env::var("STATS_FILE").unwrap_or_else(|_| "stats.json".to_string());
    let stats_backend = Arc::new(FileBackend::new(&stats_path));

    let state = AppState::new(
        game_config,
        abuse_config,
        bot_config,
        host_auth,
        stats_backend,
    );

    // Bring the persisted all-time totals back; a corrupt file was already
    // quarantined by the backend and we start from empty
    match state.stats_backend.load().await {
        Ok(stats) => {
            tracing::info!(
                total_rounds = stats.total_rounds,
                players = stats.players.len(),
                "Loaded all-time stats from {}",
                stats_path
            );
            *state.all_time.write().await = stats;
        }
        Err(e) => {
            tracing::error!("Failed to load all-time stats: {}", e);
        }
    }

    // Background sweep for expired sessions, host tokens and orphaned
    // tracking entries
    janitor::spawn_janitor(state.clone());

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/auth/host", post(auth::host_login))
        .route("/api/stats", get(api::get_all_time_stats))
        .fallback_service(ServeDir::new("static"))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
