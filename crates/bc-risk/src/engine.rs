//! Risk Evaluator (§4.6): pre-trade approval, position sizing, and the
//! balance-tier stop policy. Applies checks in a fixed order and fails fast
//! on the first violated guardrail; sizing and the tier clamp only run once
//! every guardrail has passed.

use bc_schemas::{AccountSnapshot, Position, RiskDecision, RiskRejectionReason, Side, Signal, SymbolInfo};

use crate::types::{DailyCounters, MarketContext, RiskConfig, SizingMethod};

/// Emergency signal for the caller: equity has gone negative and every
/// open position should be closed immediately, not just new entries
/// blocked (§4.6 rule 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyCloseAll;

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationInput<'a> {
    pub signal: &'a Signal,
    pub account: &'a AccountSnapshot,
    pub symbol_info: &'a SymbolInfo,
    pub open_positions_on_symbol: &'a [Position],
    pub market: MarketContext,
    pub daily: DailyCounters,
}

/// Evaluates a post-gate signal against every guardrail in §4.6, in order.
/// Returns `Ok(RiskDecision)` always (a rejection is a normal outcome, not
/// an error); `Err(EmergencyCloseAll)` only on the specific "equity < 0"
/// condition that additionally demands flattening every open position.
pub fn evaluate(cfg: &RiskConfig, input: &EvaluationInput) -> Result<RiskDecision, EmergencyCloseAll> {
    let EvaluationInput { signal, account, symbol_info, open_positions_on_symbol, market, daily } = input;

    // 1. Account health.
    if account.balance.raw() <= 0 {
        return Ok(RiskDecision::reject(RiskRejectionReason::MinimumBalance, "balance <= 0"));
    }
    if account.balance < cfg.min_balance {
        return Ok(RiskDecision::reject(
            RiskRejectionReason::MinimumBalance,
            format!("balance {:.2} below minimum {:.2}", account.balance.as_f64(), cfg.min_balance.as_f64()),
        ));
    }
    if account.equity.raw() < 0 {
        return Err(EmergencyCloseAll);
    }
    if account.margin_level_pct < cfg.min_margin_level_pct {
        return Ok(RiskDecision::reject(
            RiskRejectionReason::MarginCall,
            format!("margin level {:.1}% below {:.1}%", account.margin_level_pct, cfg.min_margin_level_pct),
        ));
    }

    // 2. Drawdown halt (hard) / survival mode (soft, handled during sizing).
    let drawdown_pct = drawdown_fraction(account) * 100.0;
    if drawdown_pct >= cfg.drawdown_halt_pct {
        return Ok(RiskDecision::reject(
            RiskRejectionReason::DrawdownHalt,
            format!("drawdown {drawdown_pct:.1}% >= halt threshold {:.1}%", cfg.drawdown_halt_pct),
        ));
    }
    let survival_mode = drawdown_pct >= cfg.drawdown_survival_pct;

    // 3. Daily limits.
    if daily.realized_loss_today >= cfg.daily_loss_limit {
        return Ok(RiskDecision::reject(RiskRejectionReason::DailyLossLimit, "daily realized loss limit reached"));
    }
    if daily.trades_today >= cfg.daily_trade_limit {
        return Ok(RiskDecision::reject(RiskRejectionReason::DailyTradeLimit, "daily trade count limit reached"));
    }

    // 4. Spread guard.
    if market.spread_points > cfg.max_spread_points || market.spread_pct > cfg.max_spread_pct {
        return Ok(RiskDecision::reject(
            RiskRejectionReason::SpreadTooWide,
            format!("spread {:.1}pts/{:.3}% exceeds max {:.1}pts/{:.3}%", market.spread_points, market.spread_pct, cfg.max_spread_points, cfg.max_spread_pct),
        ));
    }

    // 5. Per-symbol limits.
    if open_positions_on_symbol.len() as u32 >= cfg.max_positions_per_symbol {
        return Ok(RiskDecision::reject(RiskRejectionReason::MaxPositionsPerSymbol, "max positions per symbol reached"));
    }
    let notional: f64 = open_positions_on_symbol.iter().map(|p| p.remaining_volume * p.current_price * symbol_info.contract_size).sum();
    let exposure_pct = if account.equity.raw() > 0 { notional / account.equity.as_f64() * 100.0 } else { f64::INFINITY };
    if exposure_pct >= cfg.max_exposure_per_symbol_pct {
        return Ok(RiskDecision::reject(RiskRejectionReason::MaxExposurePerSymbol, "max exposure per symbol reached"));
    }

    // 6. Opposite-direction guard.
    if !cfg.hedging_enabled {
        if let Some(opp) = open_positions_on_symbol.iter().find(|p| p.side != signal.side) {
            return Ok(RiskDecision::reject(
                RiskRejectionReason::OppositeDirection,
                format!("existing {:?} position ticket {} opposes {:?} signal", opp.side, opp.ticket, signal.side),
            ));
        }
    }

    // 7. R:R guard.
    let risk = (signal.reference_price - signal.proposed_sl).abs();
    let reward = (signal.proposed_tp - signal.reference_price).abs();
    let rr = if risk <= f64::EPSILON { 0.0 } else { reward / risk };
    if rr < cfg.min_risk_reward_ratio {
        return Ok(RiskDecision::reject(
            RiskRejectionReason::RiskRewardTooLow,
            format!("R:R {rr:.2} below minimum {:.2}", cfg.min_risk_reward_ratio),
        ));
    }

    // 8. Confidence guard.
    if signal.confidence < cfg.min_confidence {
        return Ok(RiskDecision::reject(
            RiskRejectionReason::ConfidenceTooLow,
            format!("confidence {:.2} below minimum {:.2}", signal.confidence, cfg.min_confidence),
        ));
    }

    // 9-11. Sizing, balance-tier stop clamp, performance adjustment.
    let mut effective_sl = signal.proposed_sl;
    let mut applied_tier = None;

    let max_sl_pct = cfg.balance_tiers.max_sl_pct_for_balance(account.balance);
    let sl_distance_pct = if signal.reference_price.abs() > f64::EPSILON { risk / signal.reference_price * 100.0 } else { 0.0 };
    if sl_distance_pct > max_sl_pct {
        let clamped_distance = signal.reference_price * max_sl_pct / 100.0;
        effective_sl = match signal.side {
            Side::Long => signal.reference_price - clamped_distance,
            Side::Short => signal.reference_price + clamped_distance,
        };
        applied_tier = Some(format!("balance_tier_clamped_to_{max_sl_pct:.1}pct"));

        let clamped_rr = {
            let r = (signal.reference_price - effective_sl).abs();
            if r <= f64::EPSILON { 0.0 } else { reward / r }
        };
        if clamped_rr < cfg.min_risk_reward_ratio {
            return Ok(RiskDecision::reject(
                RiskRejectionReason::RiskRewardTooLow,
                format!("R:R {clamped_rr:.2} below minimum after balance-tier SL clamp"),
            ));
        }
    }

    let raw_volume = match cfg.sizing.method {
        SizingMethod::Fixed => Some(cfg.sizing.fixed_volume),
        SizingMethod::PercentRisk | SizingMethod::AtrVolatility => {
            let stop_distance = (signal.reference_price - effective_sl).abs();
            if stop_distance <= f64::EPSILON || cfg.sizing.point_value <= 0.0 {
                None
            } else {
                Some((account.balance.as_f64() * cfg.sizing.risk_pct) / (stop_distance * cfg.sizing.point_value))
            }
        }
        SizingMethod::Kelly => {
            let k = &cfg.sizing.kelly;
            let kelly_fraction = (k.win_rate - (1.0 - k.win_rate) / k.payoff_ratio.max(1e-9)).max(0.0).min(k.fraction_cap);
            let stop_distance = (signal.reference_price - effective_sl).abs();
            if stop_distance <= f64::EPSILON || cfg.sizing.point_value <= 0.0 {
                None
            } else {
                Some((account.balance.as_f64() * kelly_fraction) / (stop_distance * cfg.sizing.point_value))
            }
        }
    };

    let Some(mut volume) = raw_volume else {
        return Ok(RiskDecision::reject(RiskRejectionReason::SizingUnavailable, "sizing method could not produce a volume"));
    };

    if survival_mode {
        volume *= cfg.survival_size_multiplier;
    }
    if let Some(mult) = cfg.sizing.performance_multiplier {
        volume *= mult.clamp(0.75, 1.15);
    }

    let approved_volume = symbol_info.normalize_volume(volume);
    if approved_volume < symbol_info.volume_min {
        return Ok(RiskDecision::reject(RiskRejectionReason::SizingUnavailable, "sized volume below broker minimum"));
    }

    Ok(RiskDecision {
        approved: true,
        rejection_reason: None,
        rejection_detail: None,
        approved_volume,
        effective_sl,
        effective_tp: signal.proposed_tp,
        applied_tier,
    })
}

/// `(peak - balance) / peak`, clamped to `[0, 1]`. Zero peak is treated as
/// no drawdown rather than dividing by zero.
fn drawdown_fraction(account: &AccountSnapshot) -> f64 {
    if account.peak_balance.raw() <= 0 {
        return 0.0;
    }
    ((account.peak_balance.as_f64() - account.balance.as_f64()) / account.peak_balance.as_f64()).clamp(0.0, 1.0)
}
