mod config;
mod reaper;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parlor_api::{AppState, AppStateInner};
use parlor_db::Database;
use parlor_gateway::connection;
use parlor_gateway::dispatcher::Dispatcher;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
    });

    tokio::spawn(reaper::run_reaper_loop(
        db,
        dispatcher,
        config.reaper_interval_secs,
    ));

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(parlor_api::router(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Parlor server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
