//! Shared runtime state for bc-loop.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;
use std::time::Duration;

use bc_adoption::{reconcile_tick, BrokerSnapshot, DriftAction, LocalSnapshot};
use bc_integrity::IntegrityState;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use crate::trading_loop::{IterationOutcome, TradingLoop};

// ---------------------------------------------------------------------------
// BusMsg â€” SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
    LogLine { level: String, msg: String },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of daemon state, returned by GET /v1/status and
/// carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    pub active_run_id: Option<Uuid>,
    /// "idle" | "running" | "halted"
    pub state: String,
    pub notes: Option<String>,
    /// Reflects `IntegrityState::is_execution_blocked()` negation: true = armed.
    pub integrity_armed: bool,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    /// Mutable run/status state.
    pub status: Arc<RwLock<StatusSnapshot>>,
    /// Integrity engine state (arm / disarm).
    pub integrity: Arc<RwLock<IntegrityState>>,
    /// The running core, once `main.rs` has constructed one. `None` in the
    /// scenario tests that exercise only the HTTP control plane.
    pub trading_loop: Arc<Mutex<Option<TradingLoop>>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        let initial_status = StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            active_run_id: None,
            state: "idle".to_string(),
            notes: Some("boot: disarmed, awaiting operator arm".to_string()),
            integrity_armed: false,
        };

        // Fail-closed boot (§4.2 "Arm state"): the daemon always starts
        // disarmed, regardless of how it last shut down. Only an explicit
        // POST /v1/integrity/arm clears this.
        let mut initial_integrity = IntegrityState::new();
        initial_integrity.disarmed = true;

        Self {
            bus,
            build: BuildInfo {
                service: "bc-loop",
                version: env!("CARGO_PKG_VERSION"),
            },
            status: Arc::new(RwLock::new(initial_status)),
            integrity: Arc::new(RwLock::new(initial_integrity)),
            trading_loop: Arc::new(Mutex::new(None)),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

// ---------------------------------------------------------------------------
// Trading loop wiring
// ---------------------------------------------------------------------------

/// Install `loop_` into `state.trading_loop` and drive `run_iteration` on a
/// fixed `poll_interval`, syncing the HTTP-visible status snapshot after
/// every tick (§4.12, §5 "caller owns the poll_interval sleep").
///
/// A `ShutdownRequested` outcome (the hourly error-rate ceiling, §4.9) ends
/// the process with the exit code the core computed — the daemon has no
/// supervisor of its own to restart it.
pub fn spawn_trading_loop(state: Arc<AppState>, loop_: TradingLoop, poll_interval: Duration) {
    tokio::spawn(async move {
        {
            let mut slot = state.trading_loop.lock().await;
            *slot = Some(loop_);
        }

        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();

            let outcome = {
                let mut slot = state.trading_loop.lock().await;
                match slot.as_mut() {
                    Some(tl) => tl.run_iteration(now),
                    None => return,
                }
            };

            sync_status_from_loop(&state).await;

            if let IterationOutcome::ShutdownRequested { exit_code } = outcome {
                tracing::error!(exit_code, "iteration error-rate ceiling exceeded, shutting down");
                std::process::exit(exit_code as i32);
            }
        }
    });
}

async fn sync_status_from_loop(state: &Arc<AppState>) {
    let armed = {
        let slot = state.trading_loop.lock().await;
        match slot.as_ref() {
            Some(tl) => tl.arm_state().is_armed(),
            None => return,
        }
    };

    let snap = {
        let mut s = state.status.write().await;
        s.integrity_armed = armed;
        s.daemon_uptime_secs = uptime_secs();
        s.clone()
    };
    {
        let mut ig = state.integrity.write().await;
        ig.disarmed = !armed;
    }
    let _ = state.bus.send(BusMsg::Status(snap));
}

// ---------------------------------------------------------------------------
// Periodic broker/local reconcile tick (§4.12 step 9, §5 "reconcile gate")
// ---------------------------------------------------------------------------

/// Spawn a background task that compares a local and a broker position
/// snapshot every `interval` and disarms the daemon the moment they drift
/// apart. `local_fn`/`broker_fn` are plain closures (not async) so tests can
/// supply deterministic fixtures without standing up a real broker.
pub fn spawn_reconcile_tick<L, B>(
    state: Arc<AppState>,
    local_fn: L,
    broker_fn: B,
    interval: Duration,
) where
    L: Fn() -> LocalSnapshot + Send + 'static,
    B: Fn() -> Option<BrokerSnapshot> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            let Some(broker) = broker_fn() else { continue };
            let local = local_fn();

            if let DriftAction::HaltAndDisarm { report } = reconcile_tick(&local, &broker) {
                tracing::error!(?report, "reconcile drift detected, disarming");
                {
                    let mut ig = state.integrity.write().await;
                    ig.disarmed = true;
                }
                let snap = {
                    let mut s = state.status.write().await;
                    s.state = "halted".to_string();
                    s.integrity_armed = false;
                    s.daemon_uptime_secs = uptime_secs();
                    s.clone()
                };
                let _ = state.bus.send(BusMsg::Status(snap));
            }
        }
    });
}
