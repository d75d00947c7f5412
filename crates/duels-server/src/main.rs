mod app_state;
mod archive;
mod auth;
mod background;
mod bus;
mod catalog;
mod connection_registry;
mod duel;
mod error;
mod http;
mod invite_store;
mod lobby;
mod local_connections;
mod logging;
mod matchmaking;
mod session_store;
mod ticket_store;
mod ws_handler;

use app_state::{AppState, Services, SharedState};
use auth::JwtVerifier;
use axum::{
    routing::{get, post},
    Router,
};
use catalog::StaticCatalog;
use clap::Parser;
use duels_protocol::config::DuelConfig;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "duels-server", version, about = "Real-time 1v1 coding duel server")]
struct ServerArgs {
    #[arg(long, env = "DUELS_ADDR", default_value = "127.0.0.1:7000")]
    listen: SocketAddr,
    #[arg(
        long,
        env = "DUELS_LOG_FILTER",
        default_value = "duels_server=info,tower_http=warn"
    )]
    log_filter: String,
    #[arg(long, env = "DUELS_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,
    /// JSON array of problems; the built-in list is used when absent.
    #[arg(long, env = "DUELS_CATALOG")]
    catalog: Option<PathBuf>,
    #[arg(long, env = "DUELS_SWEEP_INTERVAL_MS", default_value_t = DuelConfig::default().sweep_interval_ms)]
    sweep_interval_ms: u64,
    #[arg(long, env = "DUELS_FORCE_MATCH_WAIT_MS", default_value_t = DuelConfig::default().force_match_wait_ms)]
    force_match_wait_ms: u64,
    #[arg(long, env = "DUELS_INVITE_TTL_SECS", default_value_t = DuelConfig::default().invite_ttl_secs)]
    invite_ttl_secs: u64,
    #[arg(long, env = "DUELS_TICKET_TTL_SECS", default_value_t = DuelConfig::default().ticket_ttl_secs)]
    ticket_ttl_secs: u64,
    #[arg(long, env = "DUELS_SESSION_GRACE_SECS", default_value_t = DuelConfig::default().session_grace_secs)]
    session_grace_secs: u64,
    #[arg(long, env = "DUELS_RECONNECT_GRACE_SECS", default_value_t = DuelConfig::default().reconnect_grace_secs)]
    reconnect_grace_secs: u64,
    #[arg(long, env = "DUELS_PING_INTERVAL_SECS", default_value_t = DuelConfig::default().ping_interval_secs)]
    ping_interval_secs: u64,
    #[arg(long, env = "DUELS_READ_DEADLINE_SECS", default_value_t = DuelConfig::default().read_deadline_secs)]
    read_deadline_secs: u64,
    #[arg(long, env = "DUELS_OUTBOUND_BUFFER", default_value_t = DuelConfig::default().outbound_buffer)]
    outbound_buffer: usize,
    #[arg(long, env = "DUELS_HOUSEKEEPING_INTERVAL_SECS", default_value_t = DuelConfig::default().housekeeping_interval_secs)]
    housekeeping_interval_secs: u64,
}

impl ServerArgs {
    fn duel_config(&self) -> DuelConfig {
        DuelConfig {
            sweep_interval_ms: self.sweep_interval_ms,
            force_match_wait_ms: self.force_match_wait_ms,
            invite_ttl_secs: self.invite_ttl_secs,
            ticket_ttl_secs: self.ticket_ttl_secs,
            session_grace_secs: self.session_grace_secs,
            reconnect_grace_secs: self.reconnect_grace_secs,
            ping_interval_secs: self.ping_interval_secs,
            read_deadline_secs: self.read_deadline_secs,
            outbound_buffer: self.outbound_buffer,
            housekeeping_interval_secs: self.housekeeping_interval_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ServerArgs::parse();
    init_tracing(&args.log_filter);

    let config = args.duel_config();
    config.validate()?;

    let catalog = match &args.catalog {
        Some(path) => StaticCatalog::from_json_file(path)?,
        None => StaticCatalog::builtin(),
    };
    let services = Services::in_memory(
        &config,
        Arc::new(JwtVerifier::new(args.jwt_secret.as_bytes())),
        Arc::new(catalog),
    );

    let bind_addr = args.listen;
    let state = AppState::start(config.clone(), services).await;
    let app = build_app(state.clone());

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(
        %bind_addr,
        sweep_interval_ms = config.sweep_interval_ms,
        force_match_wait_ms = config.force_match_wait_ms,
        "server.listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state))
    .await?;

    info!("server.stopped");
    Ok(())
}

fn build_app(state: SharedState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .route("/ws/ticket", post(http::issue_ticket))
        .route("/users/{id}/status", get(http::user_status))
        .with_state(state)
}

async fn shutdown_signal(state: SharedState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(err = %err, "server.signal_failed");
    }
    info!("server.shutting_down");
    state.shutdown().await;
}

fn init_tracing(log_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_filter.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
