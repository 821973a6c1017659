//! bc-loop entry point.
//!
//! This file is intentionally thin: it sets up tracing, builds the shared
//! HTTP state, constructs the trading core (§4.12) behind the reference
//! paper broker, and starts the HTTP server. All route handlers live in
//! `routes.rs`; all shared state types live in `state.rs`; the core
//! scheduler lives in `trading_loop.rs`.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use bc_broker::{BrokerAdapter, BrokerGateway};
use bc_broker_paper::{PaperBroker, PaperBrokerConfig};
use bc_loop::{
    routes, state,
    trading_loop::{AuditEventSink, EventSink, LoopConfig, NullEventSink, TradingLoop},
};
use chrono::Utc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    // AppState boots fail-closed (integrity disarmed). An explicit
    // POST /v1/integrity/arm from the operator is required before the core
    // will place or modify a single order (§4.2 "Arm state").
    let shared = Arc::new(state::AppState::new());

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let loop_config = loop_config_from_env();
    let poll_interval = Duration::from_secs(loop_config.poll_interval_secs.max(5));

    let mut broker = PaperBroker::new(PaperBrokerConfig::default(), Utc::now());
    broker.connect().context("connecting paper broker")?;
    let gateway = BrokerGateway::new(Box::new(broker));
    let sink = build_event_sink()?;
    let trading_loop = TradingLoop::new(loop_config, gateway, sink);

    state::spawn_trading_loop(Arc::clone(&shared), trading_loop, poll_interval);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("bc-loop listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("BC_LOOP_ADDR").ok()?.parse().ok()
}

/// The symbol/timeframe and timing knobs the core trades with. Read from
/// env so an operator can point the same binary at a different instrument
/// without a rebuild; anything unset falls back to `LoopConfig::default()`.
fn loop_config_from_env() -> LoopConfig {
    let mut config = LoopConfig::default();
    if let Ok(symbol) = std::env::var("BC_LOOP_SYMBOL") {
        config.symbol = symbol;
    }
    if let Ok(secs) = std::env::var("BC_LOOP_POLL_INTERVAL_SECS") {
        if let Ok(v) = secs.parse() {
            config.poll_interval_secs = v;
        }
    }
    config
}

/// `BC_LOOP_AUDIT_PATH` opts into a hash-chained JSONL event sink
/// (`bc-audit`, §6 "Persistence"); otherwise events are dropped, which is
/// fine for a first boot or for a dry run against the paper broker.
fn build_event_sink() -> anyhow::Result<Box<dyn EventSink>> {
    match std::env::var("BC_LOOP_AUDIT_PATH") {
        Ok(path) => {
            let writer = bc_audit::AuditWriter::new(PathBuf::from(path), true)
                .context("opening audit writer")?;
            let run_id = uuid::Uuid::new_v4();
            Ok(Box::new(AuditEventSink::new(writer, run_id, "loop")))
        }
        Err(_) => Ok(Box::new(NullEventSink)),
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
        "http://localhost:1420",
        "http://127.0.0.1:1420",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
