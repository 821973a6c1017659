//! The bar-driven trading loop (§4.12): a single-threaded cooperative
//! scheduler that composes every subsystem crate in the fixed iteration
//! order. Owns all core state directly — the tracker, the pending-entry
//! queue, the dynamic selector, the modifier subsystems, and the
//! per-iteration error counters — and is the only place permitted to call
//! through the `BrokerGateway`.
//!
//! `run_iteration` executes the twelve steps of one tick; the caller
//! (`main.rs`, or a test harness) is responsible for the `poll_interval`
//! sleep between calls and for wiring a shutdown signal.

use std::collections::BTreeMap;

use bc_adoption::{evaluate_candidates, AdoptionConfig};
use bc_broker::{BrokerGateway, GateVerdicts};
use bc_confluence::{ConfluenceConfig, ConfluenceGate, GateAction, PendingEntryQueue};
use crate::commands::{Command, CommandQueue, CommandRejection, ShutdownMode};
use bc_data::{BarCache, CacheConfig, DataError};
use bc_exits::{ContextualAdjustment, ExitCoordinator};
use bc_indicators::{IndicatorEngine, IndicatorFrame, IndicatorRequirement, IndicatorRequirementResolver};
use bc_integrity::{
    self, hour_window_id, ArmState, ErrorRateConfig, ErrorRateDecision, ErrorRateState, IntegrityConfig, IntegrityState,
};
use bc_modifiers::{DynamicStopConfig, DynamicStopManager, ProfitScaler, ProfitScalerConfig};
use bc_risk::{evaluate as evaluate_risk, DailyCounters, EvaluationInput, MarketContext, RiskConfig};
use bc_schemas::{
    AccountSnapshot, LeaseOwner, LifecycleState, OrderRequest, OrderResult, OrderStatus, OrderType, Position, Side,
    Signal, Ticket, Timeframe,
};
use bc_strategy::{strategies::canonical_roster, DynamicSelector, RegimeConfig, SelectorConfig, Strategy, TradeOutcome};
use bc_tracker::{AttemptOutcome, PositionTracker, TrackerConfig};
use chrono::{DateTime, NaiveDate, Utc};

/// Everything the loop needs to know about the instrument it trades and the
/// timing/timeout policy it enforces (§6 configuration surface, §5
/// concurrency model).
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Seconds between iterations; the spec's floor of 5s is enforced by
    /// the caller's sleep, not by this struct.
    pub poll_interval_secs: u64,
    pub lookback_bars: usize,
    pub bar_fetch_timeout_ms: u64,
    pub order_timeout_ms: u64,
    pub account_timeout_ms: u64,
    pub metrics_interval: u64,
    pub pending_entry_capacity: usize,
    pub pending_entry_max_wait_bars: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M15,
            poll_interval_secs: 60,
            lookback_bars: 250,
            bar_fetch_timeout_ms: 30_000,
            order_timeout_ms: 10_000,
            account_timeout_ms: 5_000,
            metrics_interval: 15,
            pending_entry_capacity: 20,
            pending_entry_max_wait_bars: 8,
        }
    }
}

/// Structured records emitted by the core (§6 "Event sink"). The trading
/// loop depends only on this trait; `bc-audit::AuditWriter` is the
/// reference sink (see `AuditEventSink` in this module) but any other
/// implementation can receive the same events without the loop knowing.
pub trait EventSink: Send {
    fn emit(&mut self, event_type: &str, symbol: Option<&str>, ticket: Option<Ticket>, payload: serde_json::Value);
}

/// An `EventSink` that writes every event to an append-only, optionally
/// hash-chained JSON-Lines file via `bc_audit::AuditWriter`. Event-sink
/// failures are logged and swallowed — trading decisions must never block
/// on telemetry (§5 "Shared resource policy").
pub struct AuditEventSink {
    writer: bc_audit::AuditWriter,
    run_id: uuid::Uuid,
    topic: &'static str,
}

impl AuditEventSink {
    pub fn new(writer: bc_audit::AuditWriter, run_id: uuid::Uuid, topic: &'static str) -> Self {
        AuditEventSink { writer, run_id, topic }
    }
}

impl EventSink for AuditEventSink {
    fn emit(&mut self, event_type: &str, symbol: Option<&str>, ticket: Option<Ticket>, payload: serde_json::Value) {
        let mut full = serde_json::json!({ "payload": payload });
        if let Some(symbol) = symbol {
            full["symbol"] = serde_json::Value::String(symbol.to_string());
        }
        if let Some(ticket) = ticket {
            full["ticket"] = serde_json::Value::from(ticket);
        }
        if let Err(err) = self.writer.append(self.run_id, self.topic, event_type, full) {
            tracing::warn!(error = %err, event_type, "event sink append failed, dropping telemetry");
        }
    }
}

/// A sink that drops every event; useful for tests and for the first daemon
/// boot before a real sink path is configured.
#[derive(Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&mut self, _event_type: &str, _symbol: Option<&str>, _ticket: Option<Ticket>, _payload: serde_json::Value) {}
}

/// Which of the twelve steps in §4.12 failed, for the iteration-error log
/// line and the `iteration.error{step}` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationStep {
    Ingest,
    Indicators,
    PendingEntries,
    SignalGeneration,
    Gate,
    RiskEvaluation,
    Execution,
    Reconcile,
    Monitor,
    HealthCheck,
    Metrics,
}

impl IterationStep {
    pub fn name(self) -> &'static str {
        match self {
            IterationStep::Ingest => "ingest",
            IterationStep::Indicators => "indicators",
            IterationStep::PendingEntries => "pending_entries",
            IterationStep::SignalGeneration => "signal_generation",
            IterationStep::Gate => "gate",
            IterationStep::RiskEvaluation => "risk_evaluation",
            IterationStep::Execution => "execution",
            IterationStep::Reconcile => "reconcile",
            IterationStep::Monitor => "monitor",
            IterationStep::HealthCheck => "health_check",
            IterationStep::Metrics => "metrics",
        }
    }
}

/// Outcome of one call to `run_iteration`. `Aborted` means a step failed and
/// the remainder of the iteration was skipped — not itself an error the
/// caller needs to propagate, since the error-rate monitor is what decides
/// whether repeated aborts should end the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed,
    Aborted { step: IterationStep, detail: String },
    ShutdownRequested { exit_code: u8 },
}

/// Composes every subsystem crate into the fixed twelve-step iteration
/// order of §4.12. All core state lives here; nothing is shared outside the
/// loop except through read-only snapshots the caller takes between calls
/// to `run_iteration`.
pub struct TradingLoop {
    config: LoopConfig,
    broker: BrokerGateway,
    cache: BarCache,
    tracker: PositionTracker,
    pending_entries: PendingEntryQueue,
    roster: Vec<Box<dyn Strategy>>,
    selector: DynamicSelector,
    confluence: ConfluenceGate,
    risk_config: RiskConfig,
    dynamic_stop: DynamicStopManager,
    profit_scaler: ProfitScaler,
    exit_coordinator: ExitCoordinator,
    adoption_config: AdoptionConfig,
    integrity_config: IntegrityConfig,
    integrity: IntegrityState,
    arm: ArmState,
    error_rate_cfg: ErrorRateConfig,
    error_rate: ErrorRateState,
    daily: DailyCounters,
    /// UTC calendar date `daily` was last reset for; rolled over in
    /// `run_iteration` whenever `now`'s date advances past it ("day
    /// boundary is the broker's server-time midnight UTC").
    daily_window_date: NaiveDate,
    last_reconcile_clean: bool,
    iteration_count: u64,
    sink: Box<dyn EventSink>,
    seq: u64,
    /// Command channel (§6, §5): commands submitted via `submit_command` are
    /// drained at the start of the next `run_iteration` call, never mid-flight.
    command_queue: CommandQueue,
    /// Set by a `Pause` command, cleared by `Resume`. Blocks new-entry
    /// generation only — position monitoring (exits, dynamic stops, profit
    /// scaler) keeps running so open positions are never left unmanaged.
    paused: bool,
}

impl TradingLoop {
    pub fn new(config: LoopConfig, broker: BrokerGateway, sink: Box<dyn EventSink>) -> Self {
        let roster = canonical_roster();
        let candidates: Vec<&'static str> = roster.iter().map(|s| s.name()).collect();
        let now = Utc::now();

        TradingLoop {
            config: config.clone(),
            broker,
            cache: BarCache::new(CacheConfig { lookback_bars: config.lookback_bars, ..CacheConfig::default() }),
            tracker: PositionTracker::new(TrackerConfig::default()),
            pending_entries: PendingEntryQueue::new(config.pending_entry_capacity),
            roster,
            selector: DynamicSelector::new(SelectorConfig::default(), RegimeConfig::default(), candidates),
            confluence: ConfluenceGate::new(ConfluenceConfig::default()),
            risk_config: RiskConfig::default(),
            dynamic_stop: DynamicStopManager::new(DynamicStopConfig::default()),
            profit_scaler: ProfitScaler::new(ProfitScalerConfig::default()),
            exit_coordinator: ExitCoordinator::new(ContextualAdjustment::default()),
            adoption_config: AdoptionConfig::default(),
            integrity_config: IntegrityConfig::strict_defaults(),
            integrity: IntegrityState::new(),
            // Fail-closed boot: always Disarmed until an operator explicitly arms.
            arm: ArmState::boot(None),
            error_rate_cfg: ErrorRateConfig::default(),
            error_rate: ErrorRateState::new(hour_window_id(now)),
            daily: DailyCounters::default(),
            daily_window_date: now.date_naive(),
            last_reconcile_clean: true,
            iteration_count: 0,
            sink,
            seq: 0,
            command_queue: CommandQueue::new(64),
            paused: false,
        }
    }

    /// Submits a command to the bounded queue (§5 "Concurrent writers"). The
    /// RPC server and the reconciliation callback are this method's two
    /// intended callers; both are serialized here and only ever observed by
    /// the loop at the top of its next iteration.
    pub fn submit_command(&mut self, command: Command, deadline: DateTime<Utc>, now: DateTime<Utc>) -> Result<uuid::Uuid, CommandRejection> {
        self.command_queue.submit(command, deadline, now)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn arm_state(&self) -> &ArmState {
        &self.arm
    }

    /// Explicit operator arm — the sole path to `Armed` (mirrors
    /// `ArmState::arm()`'s contract: callers must have already satisfied
    /// any reconcile gate).
    pub fn arm(&mut self) {
        self.arm = ArmState::arm();
    }

    pub fn disarm(&mut self) {
        self.arm = ArmState::manual_disarm();
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    /// Escape hatch for test harnesses that need to drive the concrete
    /// broker adapter directly (feeding bars, advancing the clock) while
    /// the loop itself only ever calls it through `BrokerGateway`.
    pub fn broker_adapter_mut(&mut self) -> &mut dyn bc_broker::BrokerAdapter {
        self.broker.adapter_mut()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Runs the twelve-step iteration once (§4.12). `now` is supplied by
    /// the caller so tests can drive the loop with a fixed clock.
    pub fn run_iteration(&mut self, now: DateTime<Utc>) -> IterationOutcome {
        self.iteration_count += 1;
        self.roll_daily_counters(now);

        macro_rules! step {
            ($step:expr, $body:expr) => {
                match $body {
                    Ok(v) => v,
                    Err(detail) => return self.abort(now, $step, detail),
                }
            };
        }

        // 0. Drain the command queue (§5: commands never interrupt an
        // iteration in progress; they are only observed here).
        if let Some(outcome) = self.drain_commands(now) {
            return outcome;
        }

        // 1. Ingest latest bars.
        let refresh = step!(IterationStep::Ingest, self.ingest_bars(now));
        let _ = refresh;

        // 2. Compute indicators.
        let frame = step!(IterationStep::Indicators, self.compute_indicators());

        // Cloned out of the cache (rather than held by reference) so the
        // rest of this iteration is free to call back into `self` --
        // `try_execute`/`reconcile_and_adopt`/`monitor_positions` all need
        // `&mut self`, which a live borrow of `self.cache` would forbid.
        let series: bc_schemas::BarSeries = match self.cache.get(&self.config.symbol, self.config.timeframe) {
            Some(s) => s.clone(),
            None => return IterationOutcome::Completed,
        };
        let Some(latest_bar) = series.newest().cloned() else {
            return IterationOutcome::Completed;
        };

        // 3. Check pending entries — touched ones re-enter at step 6.
        let touched = self.pending_entries.tick(latest_bar.high, latest_bar.low);
        for (entry, outcome) in touched {
            use bc_confluence::PendingOutcome;
            match outcome {
                PendingOutcome::Touched if !self.paused => {
                    self.sink.emit(
                        "signal.generated",
                        Some(&self.config.symbol),
                        None,
                        serde_json::json!({"source": "pending_queue", "strategy": entry.signal.strategy}),
                    );
                    self.try_execute(&entry.signal, series.as_slice(), &frame, now);
                }
                PendingOutcome::Touched => {
                    self.sink.emit(
                        "signal.rejected",
                        Some(&self.config.symbol),
                        None,
                        serde_json::json!({"reason": "paused"}),
                    );
                }
                PendingOutcome::Expired => {
                    self.sink.emit(
                        "signal.rejected",
                        Some(&self.config.symbol),
                        None,
                        serde_json::json!({"reason": "pending_entry_expired"}),
                    );
                }
                PendingOutcome::Waiting => {}
            }
        }

        // 4. Generate a signal via the active strategy (or fallback chain).
        // A `Pause` command blocks new entries only; monitoring below still
        // runs so open positions are never left unmanaged.
        self.selector.maybe_reselect(&series, now);
        let signal = if self.paused {
            None
        } else {
            step!(IterationStep::SignalGeneration, Ok::<_, String>(self.generate_signal(&latest_bar, &series, &frame)))
        };

        // 5. Advisor enhancement: no advisor is wired (Non-goal: ML/RL
        // training); the signal passes through unmodified.
        if let Some(signal) = signal {
            // 6. Gate through entry confluence.
            let result = self.confluence.evaluate(&signal, &series, &frame);
            let action = self.confluence.action_for(&result);
            match action {
                GateAction::Execute => {
                    self.try_execute(&signal, series.as_slice(), &frame, now);
                }
                GateAction::QueueOrDiscard => {
                    if let Some(optimal_entry) = result.optimal_entry {
                        self.pending_entries.push(signal, optimal_entry, self.config.pending_entry_max_wait_bars);
                    } else {
                        self.sink.emit("signal.rejected", Some(&self.config.symbol), None, serde_json::json!({"reason": "no_optimal_entry"}));
                    }
                }
                GateAction::Reject => {
                    self.sink.emit(
                        "signal.rejected",
                        Some(&self.config.symbol),
                        None,
                        serde_json::json!({"reason": result.rejection_reason.clone().unwrap_or_default()}),
                    );
                }
            }
        }

        // 9. Reconcile broker positions and adopt unmanaged ones.
        step!(IterationStep::Reconcile, self.reconcile_and_adopt(now));

        // 10. Monitor positions: profit scaler -> dynamic stop -> exit coordinator.
        step!(IterationStep::Monitor, Ok::<_, String>(self.monitor_positions(&frame, &series, now)));

        // 11. Health check.
        step!(IterationStep::HealthCheck, self.health_check());

        // 12. Emit metrics every `metrics_interval` iterations.
        if self.iteration_count % self.config.metrics_interval.max(1) == 0 {
            self.emit_metrics();
        }

        let window = hour_window_id(now);
        if let ErrorRateDecision::RequestShutdown { exit_code } = bc_integrity::error_rate::evaluate(&self.error_rate_cfg, &self.error_rate, window) {
            return IterationOutcome::ShutdownRequested { exit_code };
        }

        IterationOutcome::Completed
    }

    fn abort(&mut self, now: DateTime<Utc>, step: IterationStep, detail: String) -> IterationOutcome {
        let window = hour_window_id(now);
        self.error_rate.record_error(window);
        tracing::error!(step = step.name(), detail = %detail, "iteration aborted");
        self.sink.emit("iteration.error", Some(&self.config.symbol), None, serde_json::json!({"step": step.name(), "detail": detail}));

        if let ErrorRateDecision::RequestShutdown { exit_code } = bc_integrity::error_rate::evaluate(&self.error_rate_cfg, &self.error_rate, window) {
            return IterationOutcome::ShutdownRequested { exit_code };
        }
        IterationOutcome::Aborted { step, detail }
    }

    /// Resets `realized_loss_today`/`trades_today` the first time `now`'s
    /// UTC date is seen (server-time midnight boundary, §4.6 rule 3).
    fn roll_daily_counters(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.daily_window_date {
            self.daily = DailyCounters::default();
            self.daily_window_date = today;
        }
    }

    // ---- Step bodies ----

    fn ingest_bars(&mut self, _now: DateTime<Utc>) -> Result<(), String> {
        let full_refill = !self.cache.is_ready(&self.config.symbol, self.config.timeframe);
        match self.cache.refresh(self.broker.adapter(), &self.config.symbol, self.config.timeframe, full_refill, self.config.bar_fetch_timeout_ms) {
            Ok(_report) => Ok(()),
            Err(DataError::InsufficientHistory { .. }) => Ok(()), // not fatal; later steps no-op on empty series
            Err(DataError::Broker(e)) => Err(e.to_string()),
        }
    }

    fn compute_indicators(&self) -> Result<IndicatorFrame, String> {
        let mut resolver = IndicatorRequirementResolver::new();
        for strategy in &self.roster {
            resolver.extend(strategy.required_indicators());
        }
        resolver.add(IndicatorRequirement::Atr { period: 14 });
        resolver.add(IndicatorRequirement::Rsi { period: 14 });

        let Some(series) = self.cache.get(&self.config.symbol, self.config.timeframe) else {
            return Ok(IndicatorFrame::default());
        };
        match IndicatorEngine::new().compute(series, &resolver.resolved(), &resolver.aliases()) {
            Ok(frame) => Ok(frame),
            // Not enough bars yet: a non-fatal condition for this iteration,
            // the signal-generation step below simply no-ops on an empty frame.
            Err(_insufficient_history) => Ok(IndicatorFrame::default()),
        }
    }

    fn generate_signal(&mut self, latest_bar: &bc_schemas::Bar, series: &bc_schemas::BarSeries, frame: &IndicatorFrame) -> Option<Signal> {
        let active_name = self.selector.active_strategy()?;
        let mut order = vec![active_name];
        order.extend(self.selector.fallback_chain());

        for name in order {
            if let Some(strategy) = self.roster.iter().find(|s| s.name() == name) {
                if let Some(signal) = strategy.on_bar(latest_bar, series, frame) {
                    return Some(signal);
                }
            }
        }
        None
    }

    fn try_execute(&mut self, signal: &Signal, bars: &[bc_schemas::Bar], _frame: &IndicatorFrame, now: DateTime<Utc>) {
        let account = match self.broker.adapter().get_account() {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = %e, "get_account failed during risk evaluation, skipping signal");
                return;
            }
        };
        let symbol_info = match self.broker.adapter().get_symbol_info(&signal.symbol) {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!(error = %e, "get_symbol_info failed during risk evaluation, skipping signal");
                return;
            }
        };
        let spread = self.broker.adapter().spread(&signal.symbol).unwrap_or(bc_schemas::Spread { points: 0.0, percent: 0.0 });
        let open_on_symbol: Vec<Position> = self.tracker.for_symbol(&signal.symbol).into_iter().cloned().collect();

        let input = EvaluationInput {
            signal,
            account: &account,
            symbol_info: &symbol_info,
            open_positions_on_symbol: &open_on_symbol,
            market: MarketContext { spread_points: spread.points, spread_pct: spread.percent },
            daily: self.daily,
        };

        let decision = match evaluate_risk(&self.risk_config, &input) {
            Ok(d) => d,
            Err(bc_risk::EmergencyCloseAll) => {
                self.emergency_close_all(now);
                return;
            }
        };

        if !decision.approved {
            self.sink.emit(
                "signal.rejected",
                Some(&signal.symbol),
                None,
                serde_json::json!({"reason": decision.rejection_reason.map(|r| r.to_string()).unwrap_or_default()}),
            );
            return;
        }

        let verdicts = GateVerdicts {
            integrity_armed: self.arm.is_armed(),
            risk_allowed: true,
            reconcile_clean: self.last_reconcile_clean,
        };

        let req = OrderRequest {
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            side: signal.side,
            volume: decision.approved_volume,
            order_type: OrderType::Market,
            trigger_price: Some(signal.reference_price),
            sl: Some(decision.effective_sl),
            tp: Some(decision.effective_tp),
            timeout_ms: self.config.order_timeout_ms,
        };

        self.sink.emit("order.sent", Some(&signal.symbol), None, serde_json::json!({"side": format!("{:?}", signal.side)}));

        match self.broker.place_order(req, self.config.order_timeout_ms, &verdicts) {
            Ok(result) => self.on_order_result(signal, result, decision.effective_sl, now, bars),
            Err(e) => {
                self.sink.emit("order.rejected", Some(&signal.symbol), None, serde_json::json!({"error": e.to_string()}));
            }
        }
    }

    fn on_order_result(&mut self, signal: &Signal, result: OrderResult, effective_sl: f64, now: DateTime<Utc>, _bars: &[bc_schemas::Bar]) {
        match result.status {
            OrderStatus::Filled | OrderStatus::Partial => {
                let Some(ticket) = result.ticket else { return };
                let position = Position {
                    ticket,
                    symbol: signal.symbol.clone(),
                    side: signal.side,
                    open_volume: result.filled_volume,
                    remaining_volume: result.filled_volume,
                    entry_price: result.fill_price,
                    open_ts_utc: now,
                    current_price: result.fill_price,
                    current_sl: effective_sl,
                    current_tp: signal.proposed_tp,
                    unrealized_pnl: bc_schemas::Micros::ZERO,
                    commission: bc_schemas::Micros::ZERO,
                    swap: bc_schemas::Micros::ZERO,
                    originating_signal_id: Some(signal.id),
                    owning_strategy: Some(signal.strategy.clone()),
                    adopted: false,
                    lifecycle: LifecycleState::New,
                    tiers_taken: vec![],
                };
                self.tracker.insert_new(position);
                if self.tracker.confirm_open(ticket).is_ok() {
                    self.profit_scaler.observe_open(ticket, effective_sl);
                    self.daily.trades_today += 1;
                    self.sink.emit("position.opened", Some(&signal.symbol), Some(ticket), serde_json::json!({"strategy": signal.strategy}));
                }
            }
            OrderStatus::Rejected | OrderStatus::Timeout | OrderStatus::Error => {
                self.sink.emit(
                    "order.rejected",
                    Some(&signal.symbol),
                    None,
                    serde_json::json!({"status": format!("{:?}", result.status), "broker_error": result.broker_error_message}),
                );
            }
        }
    }

    fn emergency_close_all(&mut self, now: DateTime<Utc>) {
        tracing::error!("equity negative: closing every open position");
        self.sink.emit("risk.halted", None, None, serde_json::json!({"reason": "equity_negative"}));
        let verdicts = GateVerdicts { integrity_armed: true, risk_allowed: true, reconcile_clean: true };
        let tickets: Vec<Ticket> = self.tracker.iter().map(|(t, _)| *t).collect();
        for ticket in tickets {
            if self.tracker.begin_close(ticket, LeaseOwner::CommandQueue, now).is_ok() {
                let outcome = match self.broker.close_position(ticket, None, self.config.order_timeout_ms, &verdicts) {
                    Ok(_) => AttemptOutcome::Succeeded,
                    Err(_) => AttemptOutcome::Failed,
                };
                let _ = self.tracker.complete_close(ticket, LeaseOwner::CommandQueue, outcome);
            }
        }
        self.arm = ArmState::manual_disarm();
    }

    fn reconcile_and_adopt(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        let broker_positions = self.broker.adapter().get_positions(Some(&self.config.symbol)).map_err(|e| e.to_string())?;
        let outcomes = self.tracker.reconcile(&broker_positions);

        self.last_reconcile_clean = !outcomes.iter().any(|o| matches!(o, bc_tracker::ReconcileOutcome::ClosedByBroker { .. }));

        // Feed realized losses from broker-side closes into the daily loss
        // ceiling (§4.6 rule 3); gains don't offset it back down. Trade
        // count is tracked at entry time (`on_order_result`/manual open),
        // not here.
        for outcome in &outcomes {
            if let bc_tracker::ReconcileOutcome::ClosedByBroker { realized_pnl, .. } = outcome {
                if realized_pnl.is_negative() {
                    self.daily.realized_loss_today = self.daily.realized_loss_today.saturating_add(realized_pnl.abs());
                }
            }
        }

        let candidate_tickets: Vec<Ticket> = outcomes
            .iter()
            .filter_map(|o| match o {
                bc_tracker::ReconcileOutcome::AdoptionCandidate { ticket } => Some(*ticket),
                _ => None,
            })
            .collect();
        if candidate_tickets.is_empty() {
            return Ok(());
        }

        let atr = self
            .cache
            .get(&self.config.symbol, self.config.timeframe)
            .and_then(|series| bc_indicators::functions::atr(series.as_slice(), 14));
        let atr_by_symbol = |_symbol: &str| atr;

        let decisions = evaluate_candidates(&self.adoption_config, &candidate_tickets, &broker_positions, now, atr_by_symbol);
        for decision in decisions {
            let mut position = decision.position.clone();
            position.adopted = true;
            if let Some(sl) = decision.default_sl {
                position.current_sl = sl;
            }
            if let Some(tp) = decision.default_tp {
                position.current_tp = tp;
            }
            let ticket = position.ticket;
            self.tracker.insert_new(position.clone());
            let _ = self.tracker.confirm_open(ticket);
            self.profit_scaler.observe_open(ticket, position.current_sl);
            self.sink.emit("adoption.accepted", Some(&self.config.symbol), Some(ticket), serde_json::json!({}));
        }
        Ok(())
    }

    fn monitor_positions(&mut self, frame: &IndicatorFrame, series: &bc_schemas::BarSeries, now: DateTime<Utc>) {
        let Ok(account) = self.broker.adapter().get_account() else { return };
        let bars = series.as_slice();
        let recent_closes: Vec<f64> = bars.iter().rev().take(6).rev().map(|b| b.close).collect();
        let atr = bc_indicators::functions::atr(bars, 14).unwrap_or(0.0);
        let Some(latest_bar) = series.newest().cloned() else { return };

        self.profit_scaler.tick_bar();

        let tickets: Vec<Ticket> = self.tracker.iter().map(|(t, _)| *t).collect();
        for ticket in tickets {
            let Some(position) = self.tracker.get(ticket).cloned() else { continue };
            self.dynamic_stop.observe(&position);
            self.exit_coordinator.observe(&position, now);

            // Profit scaler first.
            if let Some(action) = self.profit_scaler.evaluate(&position, &recent_closes, &account, self.tracker.leases(), now) {
                self.apply_profit_scaler_action(ticket, &position, action, now);
                continue;
            }

            // Dynamic stop manager second.
            if let Ok(symbol_info) = self.broker.adapter().get_symbol_info(&position.symbol) {
                if let Some(candidate) = self.dynamic_stop.evaluate(&position, &symbol_info, atr, &account, self.tracker.leases(), now) {
                    self.apply_stop_candidate(ticket, candidate, now);
                    continue;
                }
            }

            // Exit coordinator third.
            if let Some(exit_signal) = self.exit_coordinator.evaluate(&position, &latest_bar, bars, frame, &account, self.tracker.leases(), now) {
                self.apply_exit_signal(ticket, &position.symbol, exit_signal, now);
            }
        }
    }

    fn apply_profit_scaler_action(&mut self, ticket: Ticket, position: &Position, action: bc_modifiers::ScalerAction, now: DateTime<Utc>) {
        if self.tracker.begin_partial_close(ticket, LeaseOwner::ProfitScaler, now).is_err() {
            return;
        }
        let verdicts = GateVerdicts { integrity_armed: self.arm.is_armed(), risk_allowed: true, reconcile_clean: self.last_reconcile_clean };
        let close_volume = position.remaining_volume * action.close_fraction;
        let volume_min = self.broker.adapter().get_symbol_info(&position.symbol).map(|i| i.volume_min).unwrap_or(0.0);
        match self.broker.close_position(ticket, Some(close_volume), self.config.order_timeout_ms, &verdicts) {
            Ok(result) => {
                let _ = self.tracker.complete_partial_close(ticket, LeaseOwner::ProfitScaler, AttemptOutcome::Succeeded, result.filled_volume, volume_min);
                self.tracker.record_tier_taken(ticket, action.tier_r_micro);
                self.sink.emit("position.partial_closed", Some(&position.symbol), Some(ticket), serde_json::json!({"tier_r_micro": action.tier_r_micro}));

                if action.set_breakeven {
                    if self.tracker.begin_modify(ticket, LeaseOwner::ProfitScaler, now).is_ok() {
                        let breakeven = position.entry_price;
                        match self.broker.modify_position(ticket, Some(breakeven), None, self.config.order_timeout_ms, &verdicts) {
                            Ok(()) => {
                                let _ = self.tracker.complete_modify(ticket, LeaseOwner::ProfitScaler, AttemptOutcome::Succeeded, Some(breakeven), None);
                            }
                            Err(_) => {
                                let _ = self.tracker.complete_modify(ticket, LeaseOwner::ProfitScaler, AttemptOutcome::Failed, None, None);
                            }
                        }
                    }
                }
            }
            Err(_) => {
                let _ = self.tracker.complete_partial_close(ticket, LeaseOwner::ProfitScaler, AttemptOutcome::Failed, 0.0, volume_min);
            }
        }
    }

    fn apply_stop_candidate(&mut self, ticket: Ticket, candidate: bc_modifiers::StopCandidate, now: DateTime<Utc>) {
        if self.tracker.begin_modify(ticket, LeaseOwner::DynamicStopManager, now).is_err() {
            return;
        }
        let verdicts = GateVerdicts { integrity_armed: self.arm.is_armed(), risk_allowed: true, reconcile_clean: self.last_reconcile_clean };
        match self.broker.modify_position(ticket, Some(candidate.new_sl), None, self.config.order_timeout_ms, &verdicts) {
            Ok(()) => {
                let _ = self.tracker.complete_modify(ticket, LeaseOwner::DynamicStopManager, AttemptOutcome::Succeeded, Some(candidate.new_sl), None);
                self.sink.emit("position.modified", Some(&candidate.ticket.to_string()), Some(ticket), serde_json::json!({"new_sl": candidate.new_sl}));
            }
            Err(_) => {
                let _ = self.tracker.complete_modify(ticket, LeaseOwner::DynamicStopManager, AttemptOutcome::Failed, None, None);
            }
        }
    }

    fn apply_exit_signal(&mut self, ticket: Ticket, symbol: &str, exit_signal: bc_schemas::ExitSignal, now: DateTime<Utc>) {
        let is_partial = exit_signal.partial_close_volume.is_some();
        let begin_result = if is_partial {
            self.tracker.begin_partial_close(ticket, LeaseOwner::ExitCoordinator, now)
        } else {
            self.tracker.begin_close(ticket, LeaseOwner::ExitCoordinator, now)
        };
        if begin_result.is_err() {
            return;
        }
        let verdicts = GateVerdicts { integrity_armed: self.arm.is_armed(), risk_allowed: true, reconcile_clean: self.last_reconcile_clean };
        let volume_min = self.broker.adapter().get_symbol_info(symbol).map(|i| i.volume_min).unwrap_or(0.0);
        match self.broker.close_position(ticket, exit_signal.partial_close_volume, self.config.order_timeout_ms, &verdicts) {
            Ok(result) => {
                let outcome_event = serde_json::json!({"reason": exit_signal.reason, "exit_type": exit_signal.exit_type.name()});
                if is_partial {
                    let _ = self.tracker.complete_partial_close(ticket, LeaseOwner::ExitCoordinator, AttemptOutcome::Succeeded, result.filled_volume, volume_min);
                } else {
                    let _ = self.tracker.complete_close(ticket, LeaseOwner::ExitCoordinator, AttemptOutcome::Succeeded);
                    self.dynamic_stop.forget(ticket);
                    self.profit_scaler.forget(ticket);
                    self.exit_coordinator.forget(ticket);
                }
                self.sink.emit("position.closed", None, Some(ticket), outcome_event);
            }
            Err(_) => {
                if is_partial {
                    let _ = self.tracker.complete_partial_close(ticket, LeaseOwner::ExitCoordinator, AttemptOutcome::Failed, 0.0, volume_min);
                } else {
                    let _ = self.tracker.complete_close(ticket, LeaseOwner::ExitCoordinator, AttemptOutcome::Failed);
                }
            }
        }
    }

    fn health_check(&mut self) -> Result<(), String> {
        if self.broker.adapter().is_connected() {
            return Ok(());
        }
        self.sink.emit("broker.disconnected", None, None, serde_json::json!({}));
        match self.broker.adapter_mut().connect() {
            Ok(()) => {
                self.sink.emit("broker.reconnected", None, None, serde_json::json!({}));
                self.cache.invalidate_all();
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn emit_metrics(&mut self) {
        let seq = self.next_seq();
        self.sink.emit(
            "metrics.snapshot",
            Some(&self.config.symbol),
            None,
            serde_json::json!({
                "seq": seq,
                "open_positions": self.tracker.len(),
                "iteration": self.iteration_count,
                "armed": self.arm.is_armed(),
            }),
        );
    }

    // ---- Command channel (§6, §5) ----

    /// Drains the command queue and applies every ready command in FIFO
    /// order. Returns `Some(outcome)` only when a `Shutdown` command ends
    /// the iteration early; every other command resolves without touching
    /// the iteration's control flow.
    fn drain_commands(&mut self, now: DateTime<Utc>) -> Option<IterationOutcome> {
        let drained = self.command_queue.drain(now);
        for (queued, readiness) in drained {
            if let Err(rejection) = readiness {
                self.sink.emit(
                    "command.rejected",
                    None,
                    None,
                    serde_json::json!({"id": queued.id.to_string(), "reason": rejection.code()}),
                );
                continue;
            }
            if let Some(outcome) = self.apply_command(queued.id, queued.command, now) {
                return Some(outcome);
            }
        }
        None
    }

    fn apply_command(&mut self, id: uuid::Uuid, command: Command, now: DateTime<Utc>) -> Option<IterationOutcome> {
        match command {
            Command::Pause => {
                self.paused = true;
                self.sink.emit("command.applied", None, None, serde_json::json!({"id": id.to_string(), "command": "pause"}));
                None
            }
            Command::Resume => {
                self.paused = false;
                self.sink.emit("command.applied", None, None, serde_json::json!({"id": id.to_string(), "command": "resume"}));
                None
            }
            Command::Status => {
                self.sink.emit("command.applied", None, None, serde_json::json!({"id": id.to_string(), "command": "status"}));
                None
            }
            Command::Shutdown { mode } => {
                self.sink.emit("command.applied", None, None, serde_json::json!({"id": id.to_string(), "command": "shutdown", "mode": format!("{mode:?}")}));
                if matches!(mode, ShutdownMode::Drain) {
                    self.emergency_close_all(now);
                }
                Some(IterationOutcome::ShutdownRequested { exit_code: 0 })
            }
            Command::ManualOpen { symbol, side, volume, sl, tp, reason } => {
                self.apply_manual_open(id, symbol, side, volume, sl, tp, reason, now);
                None
            }
            Command::ManualClose { ticket, volume } => {
                self.apply_manual_close(id, ticket, volume, now);
                None
            }
            Command::ManualModify { ticket, sl, tp } => {
                self.apply_manual_modify(id, ticket, sl, tp, now);
                None
            }
        }
    }

    /// Manual opens bypass strategy generation and the confluence gate (the
    /// operator is the quality gate here) but never the integrity/reconcile
    /// gate: a disarmed or unreconciled system refuses a manual open exactly
    /// like an automatic one.
    fn apply_manual_open(
        &mut self,
        id: uuid::Uuid,
        symbol: String,
        side: Side,
        volume: f64,
        sl: Option<f64>,
        tp: Option<f64>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) {
        let symbol_info = match self.broker.adapter().get_symbol_info(&symbol) {
            Ok(i) => i,
            Err(e) => {
                self.sink.emit("command.rejected", Some(&symbol), None, serde_json::json!({"id": id.to_string(), "reason": "invalid", "detail": e.to_string()}));
                return;
            }
        };
        let normalized_volume = symbol_info.normalize_volume(volume);
        if normalized_volume < symbol_info.volume_min {
            self.sink.emit("command.rejected", Some(&symbol), None, serde_json::json!({"id": id.to_string(), "reason": "invalid", "detail": "volume below broker minimum"}));
            return;
        }

        let verdicts = GateVerdicts { integrity_armed: self.arm.is_armed(), risk_allowed: true, reconcile_clean: self.last_reconcile_clean };
        let req = OrderRequest {
            signal_id: uuid::Uuid::new_v4(),
            symbol: symbol.clone(),
            side,
            volume: normalized_volume,
            order_type: OrderType::Market,
            trigger_price: None,
            sl,
            tp,
            timeout_ms: self.config.order_timeout_ms,
        };
        self.sink.emit("order.sent", Some(&symbol), None, serde_json::json!({"id": id.to_string(), "manual": true, "reason": reason}));
        match self.broker.place_order(req, self.config.order_timeout_ms, &verdicts) {
            Ok(result) if matches!(result.status, OrderStatus::Filled | OrderStatus::Partial) => {
                let Some(ticket) = result.ticket else { return };
                let position = Position {
                    ticket,
                    symbol: symbol.clone(),
                    side,
                    open_volume: result.filled_volume,
                    remaining_volume: result.filled_volume,
                    entry_price: result.fill_price,
                    open_ts_utc: now,
                    current_price: result.fill_price,
                    current_sl: sl.unwrap_or(result.fill_price),
                    current_tp: tp.unwrap_or(result.fill_price),
                    unrealized_pnl: bc_schemas::Micros::ZERO,
                    commission: bc_schemas::Micros::ZERO,
                    swap: bc_schemas::Micros::ZERO,
                    originating_signal_id: None,
                    owning_strategy: None,
                    adopted: false,
                    lifecycle: LifecycleState::New,
                    tiers_taken: vec![],
                };
                self.tracker.insert_new(position);
                if self.tracker.confirm_open(ticket).is_ok() {
                    self.profit_scaler.observe_open(ticket, sl.unwrap_or(result.fill_price));
                    self.daily.trades_today += 1;
                    self.sink.emit("position.opened", Some(&symbol), Some(ticket), serde_json::json!({"manual": true}));
                }
            }
            Ok(result) => {
                self.sink.emit("order.rejected", Some(&symbol), None, serde_json::json!({"id": id.to_string(), "status": format!("{:?}", result.status)}));
            }
            Err(e) => {
                self.sink.emit("order.rejected", Some(&symbol), None, serde_json::json!({"id": id.to_string(), "error": e.to_string()}));
            }
        }
    }

    /// Acquires the ticket's mutation lease before closing; per §5 "acquire
    /// or skip", a ticket already leased by another subsystem this iteration
    /// rejects the manual command with `busy` rather than waiting for it.
    fn apply_manual_close(&mut self, id: uuid::Uuid, ticket: Ticket, volume: Option<f64>, now: DateTime<Utc>) {
        let is_partial = volume.is_some();
        let symbol = self.tracker.get(ticket).map(|p| p.symbol.clone());
        let begin_result = if is_partial {
            self.tracker.begin_partial_close(ticket, LeaseOwner::CommandQueue, now)
        } else {
            self.tracker.begin_close(ticket, LeaseOwner::CommandQueue, now)
        };
        if begin_result.is_err() {
            self.sink.emit("command.rejected", None, Some(ticket), serde_json::json!({"id": id.to_string(), "reason": "busy"}));
            return;
        }
        let verdicts = GateVerdicts { integrity_armed: self.arm.is_armed(), risk_allowed: true, reconcile_clean: self.last_reconcile_clean };
        let volume_min = symbol.as_deref().and_then(|s| self.broker.adapter().get_symbol_info(s).ok()).map(|i| i.volume_min).unwrap_or(0.0);
        match self.broker.close_position(ticket, volume, self.config.order_timeout_ms, &verdicts) {
            Ok(result) => {
                if is_partial {
                    let _ = self.tracker.complete_partial_close(ticket, LeaseOwner::CommandQueue, AttemptOutcome::Succeeded, result.filled_volume, volume_min);
                } else {
                    let _ = self.tracker.complete_close(ticket, LeaseOwner::CommandQueue, AttemptOutcome::Succeeded);
                    self.dynamic_stop.forget(ticket);
                    self.profit_scaler.forget(ticket);
                    self.exit_coordinator.forget(ticket);
                }
                self.sink.emit("position.closed", None, Some(ticket), serde_json::json!({"id": id.to_string(), "reason": "manual_close"}));
            }
            Err(e) => {
                if is_partial {
                    let _ = self.tracker.complete_partial_close(ticket, LeaseOwner::CommandQueue, AttemptOutcome::Failed, 0.0, volume_min);
                } else {
                    let _ = self.tracker.complete_close(ticket, LeaseOwner::CommandQueue, AttemptOutcome::Failed);
                }
                self.sink.emit("command.rejected", None, Some(ticket), serde_json::json!({"id": id.to_string(), "reason": "invalid", "detail": e.to_string()}));
            }
        }
    }

    fn apply_manual_modify(&mut self, id: uuid::Uuid, ticket: Ticket, sl: Option<f64>, tp: Option<f64>, now: DateTime<Utc>) {
        if sl.is_none() && tp.is_none() {
            self.sink.emit("command.rejected", None, Some(ticket), serde_json::json!({"id": id.to_string(), "reason": "invalid", "detail": "neither sl nor tp given"}));
            return;
        }
        if self.tracker.begin_modify(ticket, LeaseOwner::CommandQueue, now).is_err() {
            self.sink.emit("command.rejected", None, Some(ticket), serde_json::json!({"id": id.to_string(), "reason": "busy"}));
            return;
        }
        let verdicts = GateVerdicts { integrity_armed: self.arm.is_armed(), risk_allowed: true, reconcile_clean: self.last_reconcile_clean };
        match self.broker.modify_position(ticket, sl, tp, self.config.order_timeout_ms, &verdicts) {
            Ok(()) => {
                let _ = self.tracker.complete_modify(ticket, LeaseOwner::CommandQueue, AttemptOutcome::Succeeded, sl, tp);
                self.sink.emit("position.modified", None, Some(ticket), serde_json::json!({"id": id.to_string(), "sl": sl, "tp": tp, "manual": true}));
            }
            Err(e) => {
                let _ = self.tracker.complete_modify(ticket, LeaseOwner::CommandQueue, AttemptOutcome::Failed, None, None);
                self.sink.emit("command.rejected", None, Some(ticket), serde_json::json!({"id": id.to_string(), "reason": "invalid", "detail": e.to_string()}));
            }
        }
    }
}
