//! Individual exit strategies (§4.8). Each strategy is a pure function of
//! its context — no strategy owns mutable state, the coordinator tracks
//! whatever per-position history a strategy needs (e.g. the favorable
//! extreme for trailing stops) and passes it in.

use bc_indicators::IndicatorFrame;
use bc_schemas::{AccountSnapshot, Bar, ExitSignal, ExitType, Position, Side};
use chrono::{DateTime, Datelike, Utc};

/// Per-position state a strategy needs across iterations, tracked by the
/// coordinator and handed back in on the next call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitMemory {
    pub favorable_extreme: f64,
    pub opened_ts_utc: DateTime<Utc>,
}

pub struct ExitContext<'a> {
    pub position: &'a Position,
    pub bar: &'a Bar,
    pub recent_bars: &'a [Bar],
    pub indicators: &'a IndicatorFrame,
    pub account: &'a AccountSnapshot,
    pub memory: ExitMemory,
    pub now: DateTime<Utc>,
}

pub trait ExitStrategy {
    fn exit_type(&self) -> ExitType;

    fn name(&self) -> &'static str {
        self.exit_type().name()
    }

    fn should_exit(&self, ctx: &ExitContext) -> Option<ExitSignal>;
}

fn signal(ticket: bc_schemas::Ticket, exit_type: ExitType, priority: i32, reason: impl Into<String>, partial: Option<f64>, now: DateTime<Utc>) -> ExitSignal {
    ExitSignal { ticket, exit_type, priority, reason: reason.into(), partial_close_volume: partial, ts_utc: now }
}

/// Rapid adverse move beyond `sigma_mult` standard deviations of recent
/// bar-to-bar returns within `window_secs`.
pub struct FlashCrashExit {
    pub sigma_mult: f64,
    pub window_secs: i64,
}

impl Default for FlashCrashExit {
    fn default() -> Self {
        FlashCrashExit { sigma_mult: 4.0, window_secs: 120 }
    }
}

impl ExitStrategy for FlashCrashExit {
    fn exit_type(&self) -> ExitType {
        ExitType::FlashCrash
    }

    fn should_exit(&self, ctx: &ExitContext) -> Option<ExitSignal> {
        let cutoff = ctx.now - chrono::Duration::seconds(self.window_secs);
        let window: Vec<&Bar> = ctx.recent_bars.iter().filter(|b| b.ts_utc >= cutoff).collect();
        if window.len() < 3 {
            return None;
        }
        let returns: Vec<f64> = window.windows(2).map(|w| (w[1].close - w[0].close) / w[0].close.max(1e-9)).collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let std_dev = variance.sqrt().max(1e-9);

        let latest_return = (ctx.bar.close - window[window.len() - 1].open) / window[window.len() - 1].open.max(1e-9);
        let adverse = match ctx.position.side {
            Side::Long => latest_return < 0.0,
            Side::Short => latest_return > 0.0,
        };
        if adverse && (latest_return.abs() / std_dev) >= self.sigma_mult {
            return Some(signal(
                ctx.position.ticket,
                ExitType::FlashCrash,
                self.exit_type().base_priority(),
                format!("adverse move {:.2} sigma within {}s", latest_return.abs() / std_dev, self.window_secs),
                None,
                ctx.now,
            ));
        }
        None
    }
}

/// Retraces by `atr_mult * ATR` from the favorable extreme, only active
/// once unrealized profit clears `activation_r`.
pub struct TrailingStopExit {
    pub atr_mult: f64,
    pub activation_r: f64,
}

impl Default for TrailingStopExit {
    fn default() -> Self {
        TrailingStopExit { atr_mult: 2.0, activation_r: 1.0 }
    }
}

impl ExitStrategy for TrailingStopExit {
    fn exit_type(&self) -> ExitType {
        ExitType::TrailingStop
    }

    fn should_exit(&self, ctx: &ExitContext) -> Option<ExitSignal> {
        let atr = ctx.indicators.alias("atr").and_then(bc_schemas::IndicatorValue::as_scalar)?;
        let risk = ctx.position.initial_risk().max(1e-9);
        let r_multiple = (ctx.position.current_price - ctx.position.entry_price) * ctx.position.side.sign() as f64 / risk;
        if r_multiple < self.activation_r {
            return None;
        }

        let retrace = (ctx.memory.favorable_extreme - ctx.position.current_price).abs();
        if retrace >= self.atr_mult * atr {
            return Some(signal(
                ctx.position.ticket,
                ExitType::TrailingStop,
                self.exit_type().base_priority(),
                format!("retraced {retrace:.5} from favorable extreme, {:.5} ATR budget", self.atr_mult * atr),
                None,
                ctx.now,
            ));
        }
        None
    }
}

/// Absolute target price or R-multiple target reached.
pub struct ProfitTargetExit {
    pub target_r: f64,
}

impl Default for ProfitTargetExit {
    fn default() -> Self {
        ProfitTargetExit { target_r: 3.0 }
    }
}

impl ExitStrategy for ProfitTargetExit {
    fn exit_type(&self) -> ExitType {
        ExitType::ProfitTarget
    }

    fn should_exit(&self, ctx: &ExitContext) -> Option<ExitSignal> {
        let risk = ctx.position.initial_risk().max(1e-9);
        let r_multiple = (ctx.position.current_price - ctx.position.entry_price) * ctx.position.side.sign() as f64 / risk;
        let tp_hit = match ctx.position.side {
            Side::Long => ctx.position.current_price >= ctx.position.current_tp,
            Side::Short => ctx.position.current_price <= ctx.position.current_tp,
        };
        if tp_hit || r_multiple >= self.target_r {
            return Some(signal(
                ctx.position.ticket,
                ExitType::ProfitTarget,
                self.exit_type().base_priority(),
                format!("profit target reached at {r_multiple:.2}R"),
                None,
                ctx.now,
            ));
        }
        None
    }
}

/// Position age exceeds `max_age`, or a sessioned instrument approaches
/// the weekend/broker-close boundary (§4.8 "Weekend / session policy").
pub struct TimeBasedExit {
    pub max_age: chrono::Duration,
    pub crypto_prefixes: Vec<String>,
    pub weekend_protection_lead: chrono::Duration,
}

impl Default for TimeBasedExit {
    fn default() -> Self {
        TimeBasedExit {
            max_age: chrono::Duration::hours(48),
            crypto_prefixes: vec!["BTC".into(), "ETH".into(), "XRP".into(), "LTC".into()],
            weekend_protection_lead: chrono::Duration::hours(1),
        }
    }
}

/// `true` when `symbol` is a 24/7 instrument by prefix, per the
/// configurable crypto-root set (§4.8 weekend/session policy).
pub fn is_24_7_instrument(symbol: &str, crypto_prefixes: &[String]) -> bool {
    crypto_prefixes.iter().any(|p| symbol.starts_with(p.as_str()))
}

impl ExitStrategy for TimeBasedExit {
    fn exit_type(&self) -> ExitType {
        ExitType::TimeBased
    }

    fn should_exit(&self, ctx: &ExitContext) -> Option<ExitSignal> {
        let age = ctx.now - ctx.memory.opened_ts_utc;
        if age >= self.max_age {
            return Some(signal(
                ctx.position.ticket,
                ExitType::TimeBased,
                self.exit_type().base_priority(),
                format!("position age {age} exceeds max_age {}", self.max_age),
                None,
                ctx.now,
            ));
        }

        if !is_24_7_instrument(&ctx.position.symbol, &self.crypto_prefixes) {
            let weekday = ctx.now.weekday();
            let approaching_weekend = weekday == chrono::Weekday::Fri && (ctx.now + self.weekend_protection_lead).weekday() != chrono::Weekday::Fri;
            if approaching_weekend {
                return Some(signal(
                    ctx.position.ticket,
                    ExitType::TimeBased,
                    self.exit_type().base_priority(),
                    "weekend protection: sessioned instrument approaching broker close",
                    None,
                    ctx.now,
                ));
            }
        }
        None
    }
}

/// Hard stop loss: price has crossed `current_sl`. This is the backstop
/// that always fires if nothing else caught the move first.
pub struct HardStopLossExit;

impl ExitStrategy for HardStopLossExit {
    fn exit_type(&self) -> ExitType {
        ExitType::HardStopLoss
    }

    fn should_exit(&self, ctx: &ExitContext) -> Option<ExitSignal> {
        let hit = match ctx.position.side {
            Side::Long => ctx.position.current_price <= ctx.position.current_sl,
            Side::Short => ctx.position.current_price >= ctx.position.current_sl,
        };
        if hit {
            return Some(signal(
                ctx.position.ticket,
                ExitType::HardStopLoss,
                self.exit_type().base_priority(),
                "price crossed current stop loss",
                None,
                ctx.now,
            ));
        }
        None
    }
}
