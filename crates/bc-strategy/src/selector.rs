//! Dynamic strategy selector (§4.4): every `regime_check_interval`, scores
//! every candidate strategy as `w_perf * perf + w_regime * regime_fit +
//! w_conf * conf_bias` and activates the argmax, breaking ties by
//! lower name-sort order for determinism. An optional fallback chain lets
//! the loop consult the next-best candidates, in score order, if the
//! active strategy produces no signal on the current bar.

use std::collections::{BTreeMap, VecDeque};

use bc_schemas::BarSeries;
use chrono::{DateTime, Utc};

use crate::regime::{detect_regime, Regime, RegimeConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectorWeights {
    pub w_perf: f64,
    pub w_regime: f64,
    pub w_conf: f64,
}

impl Default for SelectorWeights {
    fn default() -> Self {
        SelectorWeights { w_perf: 0.4, w_regime: 0.45, w_conf: 0.15 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectorConfig {
    pub regime_check_interval_secs: i64,
    pub weights: SelectorWeights,
    /// Off by default (§4.4: "configurable and defaults off").
    pub fallback_enabled: bool,
    pub fallback_max_alternates: usize,
    pub perf_window_trades: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        SelectorConfig {
            regime_check_interval_secs: 180,
            weights: SelectorWeights::default(),
            fallback_enabled: false,
            fallback_max_alternates: 2,
            perf_window_trades: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeOutcome {
    pub won: bool,
    /// Realized profit in R-multiples; used for the profit-factor half of
    /// the performance score.
    pub r_multiple: f64,
}

#[derive(Debug, Clone, Default)]
struct StrategyPerformance {
    outcomes: VecDeque<TradeOutcome>,
    window: usize,
}

impl StrategyPerformance {
    fn record(&mut self, outcome: TradeOutcome) {
        self.outcomes.push_back(outcome);
        while self.outcomes.len() > self.window.max(1) {
            self.outcomes.pop_front();
        }
    }

    /// Blends win-rate and profit-factor into a single `[0, 1]`-ish score.
    /// An untraded strategy scores a neutral 0.5 rather than 0 — unproven
    /// is not the same as bad.
    fn perf_score(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.5;
        }
        let n = self.outcomes.len() as f64;
        let win_rate = self.outcomes.iter().filter(|o| o.won).count() as f64 / n;
        let gains: f64 = self.outcomes.iter().filter(|o| o.r_multiple > 0.0).map(|o| o.r_multiple).sum();
        let losses: f64 = self.outcomes.iter().filter(|o| o.r_multiple < 0.0).map(|o| -o.r_multiple).sum();
        let profit_factor = if losses > f64::EPSILON { gains / losses } else if gains > 0.0 { 2.0 } else { 1.0 };
        // Profit factor of 1.0 (break-even) maps to 0.5; saturates at 0/1.
        let pf_score = (profit_factor / 2.0).clamp(0.0, 1.0);
        (win_rate + pf_score) / 2.0
    }
}

pub struct DynamicSelector {
    config: SelectorConfig,
    regime_config: RegimeConfig,
    affinity: BTreeMap<&'static str, BTreeMap<Regime, f64>>,
    conf_bias: BTreeMap<&'static str, f64>,
    performance: BTreeMap<&'static str, StrategyPerformance>,
    candidates: Vec<&'static str>,
    last_check: Option<DateTime<Utc>>,
    active: Option<&'static str>,
    ranked: Vec<(&'static str, f64)>,
}

impl DynamicSelector {
    pub fn new(config: SelectorConfig, regime_config: RegimeConfig, candidates: Vec<&'static str>) -> Self {
        let perf_window = config.perf_window_trades;
        let mut performance = BTreeMap::new();
        for name in &candidates {
            performance.insert(*name, StrategyPerformance { outcomes: VecDeque::new(), window: perf_window });
        }
        DynamicSelector {
            affinity: default_affinity_table(),
            conf_bias: BTreeMap::new(),
            performance,
            candidates,
            config,
            regime_config,
            last_check: None,
            active: None,
            ranked: Vec::new(),
        }
    }

    pub fn set_conf_bias(&mut self, name: &'static str, bias: f64) {
        self.conf_bias.insert(name, bias);
    }

    pub fn record_trade(&mut self, name: &'static str, outcome: TradeOutcome) {
        self.performance.entry(name).or_insert_with(|| StrategyPerformance { outcomes: VecDeque::new(), window: self.config.perf_window_trades }).record(outcome);
    }

    pub fn active_strategy(&self) -> Option<&'static str> {
        self.active
    }

    /// Candidates ranked best-to-worst from the most recent scoring pass,
    /// for the fallback chain to walk in order.
    pub fn ranked(&self) -> &[(&'static str, f64)] {
        &self.ranked
    }

    /// Re-scores and re-selects if `regime_check_interval_secs` has elapsed
    /// since the last check (or this is the first call). Returns `true` if
    /// a (re)selection happened.
    pub fn maybe_reselect(&mut self, series: &BarSeries, now: DateTime<Utc>) -> bool {
        let due = match self.last_check {
            None => true,
            Some(last) => (now - last).num_seconds() >= self.config.regime_check_interval_secs,
        };
        if !due {
            return false;
        }
        self.last_check = Some(now);

        let regime = detect_regime(series, &self.regime_config);
        let mut scored: Vec<(&'static str, f64)> = self
            .candidates
            .iter()
            .map(|name| {
                let perf = self.performance.get(*name).map(StrategyPerformance::perf_score).unwrap_or(0.5);
                let regime_fit = regime.and_then(|r| self.affinity.get(*name).and_then(|t| t.get(&r))).copied().unwrap_or(0.3);
                let conf = self.conf_bias.get(*name).copied().unwrap_or(0.5);
                let w = &self.config.weights;
                let score = w.w_perf * perf + w.w_regime * regime_fit + w.w_conf * conf;
                (*name, score)
            })
            .collect();

        // Highest score first; ties broken by lower name-sort order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(b.0)));
        self.active = scored.first().map(|(name, _)| *name);
        self.ranked = scored;
        true
    }

    /// Up to `fallback_max_alternates` candidates after the active one, in
    /// ranked order, for the loop to consult when the active strategy
    /// produces no signal. Empty if the fallback chain is disabled.
    pub fn fallback_chain(&self) -> Vec<&'static str> {
        if !self.config.fallback_enabled {
            return Vec::new();
        }
        self.ranked.iter().skip(1).take(self.config.fallback_max_alternates).map(|(name, _)| *name).collect()
    }
}

/// Default per-strategy affinity over the five regimes, reflecting each
/// strategy's design intent. Callers may override entries via a config
/// layer before the first `maybe_reselect`.
fn default_affinity_table() -> BTreeMap<&'static str, BTreeMap<Regime, f64>> {
    use Regime::*;
    let mut table = BTreeMap::new();
    let entries: &[(&'static str, &[(Regime, f64)])] = &[
        ("sma_crossover", &[(TrendingUp, 0.80), (TrendingDown, 0.80), (Ranging, 0.20), (Volatile, 0.30), (Consolidating, 0.15)]),
        ("ema_crossover", &[(TrendingUp, 0.85), (TrendingDown, 0.85), (Ranging, 0.20), (Volatile, 0.35), (Consolidating, 0.15)]),
        ("momentum_breakout", &[(TrendingUp, 0.60), (TrendingDown, 0.60), (Ranging, 0.20), (Volatile, 0.85), (Consolidating, 0.10)]),
        ("scalping", &[(TrendingUp, 0.30), (TrendingDown, 0.30), (Ranging, 0.60), (Volatile, 0.35), (Consolidating, 0.70)]),
        ("trend_following", &[(TrendingUp, 0.90), (TrendingDown, 0.90), (Ranging, 0.10), (Volatile, 0.25), (Consolidating, 0.05)]),
        ("mean_reversion", &[(TrendingUp, 0.10), (TrendingDown, 0.10), (Ranging, 0.80), (Volatile, 0.20), (Consolidating, 0.70)]),
        ("rsi_reversal", &[(TrendingUp, 0.20), (TrendingDown, 0.20), (Ranging, 0.60), (Volatile, 0.30), (Consolidating, 0.50)]),
    ];
    for (name, regimes) in entries {
        table.insert(*name, regimes.iter().copied().collect());
    }
    table
}
