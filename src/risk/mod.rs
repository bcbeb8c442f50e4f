//! Hold-period risk scoring.
//!
//! Pure computation over persisted price history: volatility estimation,
//! Monte Carlo simulation of the forced holding period under a discrete
//! log-normal (geometric Brownian motion) terminal-price model, percentile
//! risk metrics, and an action recommendation.
//!
//! The `σ·sqrt(hold_days)` scaling assumes i.i.d. daily log-returns. For
//! thinly traded items whose drift wanders, the simulated probabilities are
//! biased; a known modeling approximation, kept as such.

pub mod math;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::RiskConfig;
use crate::types::{Action, RiskAssessment};

/// How per-step returns are computed from a price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityMethod {
    /// `ln(P_t / P_{t-1})`
    LogReturns,
    /// `(P_t - P_{t-1}) / P_{t-1}`
    SimpleReturns,
}

// ---------------------------------------------------------------------------
// Pure functions
// ---------------------------------------------------------------------------

/// Fee-adjusted spread PnL at current quotes:
/// `sell_bid * (1 - fee_rate) - buy_ask`.
pub fn current_spread_pnl(sell_bid: f64, buy_ask: f64, fee_rate: f64) -> f64 {
    sell_bid * (1.0 - fee_rate) - buy_ask
}

/// Spread as a percentage of the buy-side ask. Zero when the ask is zero.
pub fn spread_pct(pnl: f64, buy_ask: f64) -> f64 {
    if buy_ask == 0.0 {
        0.0
    } else {
        pnl / buy_ask * 100.0
    }
}

/// Per-period volatility of a price series as a decimal (0.2 = 20%).
///
/// Needs at least two prices, otherwise 0. Returns the population standard
/// deviation of the per-step returns; no annualisation is applied.
pub fn volatility(prices: &[f64], method: VolatilityMethod) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = match method {
        VolatilityMethod::LogReturns => prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect(),
        VolatilityMethod::SimpleReturns => {
            prices.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect()
        }
    };

    math::std_dev(&returns)
}

/// Risk-adjusted opportunity score:
/// `expected_pnl * execution_prob - |var_95| * (1 - prob_positive) * risk_aversion`.
///
/// Monotonic increasing in `expected_pnl` and `prob_positive`, decreasing
/// in `|var_95|` and `risk_aversion`.
pub fn risk_adjusted_score(
    expected_pnl: f64,
    prob_positive: f64,
    var_95: f64,
    execution_prob: f64,
    risk_aversion: f64,
) -> f64 {
    expected_pnl * execution_prob - var_95.abs() * (1.0 - prob_positive) * risk_aversion
}

/// Recommend an action for a spread opportunity. Decision order matters:
/// an insufficient current spread short-circuits to `skip` before any
/// holding-period consideration.
pub fn recommend_action(
    pnl_now: f64,
    prob_positive: f64,
    expected_pnl: f64,
    min_pnl: f64,
    min_prob_positive: f64,
) -> Action {
    if pnl_now < min_pnl {
        return Action::Skip;
    }
    if prob_positive < min_prob_positive {
        return Action::Monitor;
    }
    if expected_pnl < min_pnl {
        return Action::Monitor;
    }
    Action::Candidate
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Stateful wrapper owning the simulation RNG and the configured
/// thresholds. CPU-bound and synchronous; cost scales linearly with the
/// simulation count.
pub struct RiskEngine {
    cfg: RiskConfig,
    rng: StdRng,
}

impl RiskEngine {
    pub fn new(cfg: RiskConfig) -> Self {
        Self {
            cfg,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic engine for tests and reproducible runs.
    pub fn with_seed(cfg: RiskConfig, seed: u64) -> Self {
        Self {
            cfg,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.cfg
    }

    /// One standard-normal variate via inverse-CDF transform of a uniform
    /// draw.
    fn standard_normal(&mut self) -> f64 {
        let u: f64 = self.rng.gen_range(1e-10..(1.0 - 1e-10));
        math::norm_ppf(u)
    }

    /// Simulate terminal prices after the holding period.
    ///
    /// `Price_T = Price_0 * exp(drift*h - 0.5σ²h + σ√h·Z)` with `drift` and
    /// `daily_volatility` in daily units and `h = hold_days`. Returns the
    /// full vector so callers can derive arbitrary percentile metrics.
    pub fn simulate_holding_period(
        &mut self,
        current_price: f64,
        daily_volatility: f64,
        hold_days: u32,
        n_simulations: usize,
        drift: f64,
    ) -> Vec<f64> {
        let h = f64::from(hold_days);
        let adjustment = drift * h - 0.5 * daily_volatility * daily_volatility * h;
        let diffusion = daily_volatility * h.sqrt();

        (0..n_simulations)
            .map(|_| {
                let z = self.standard_normal();
                current_price * (adjustment + diffusion * z).exp()
            })
            .collect()
    }

    /// Full holding-period risk assessment for one opportunity.
    ///
    /// Simulates the sell-side quote over the hold, applies the sell-side
    /// fee, and measures the resulting PnL distribution against the
    /// (assumed static) buy-side ask.
    pub fn assess_hold_period_risk(
        &mut self,
        sell_bid: f64,
        buy_ask: f64,
        daily_volatility: f64,
        hold_days: u32,
        n_simulations: usize,
        drift: f64,
    ) -> RiskAssessment {
        let fee_rate = self.cfg.fee_rate;
        let simulated =
            self.simulate_holding_period(sell_bid, daily_volatility, hold_days, n_simulations, drift);

        let pnl: Vec<f64> = simulated
            .iter()
            .map(|price| price * (1.0 - fee_rate) - buy_ask)
            .collect();

        let positive = pnl.iter().filter(|v| **v > 0.0).count();
        let prob_positive = positive as f64 / pnl.len().max(1) as f64;
        let expected_pnl = math::mean(&pnl);
        let var_95 = math::percentile(&pnl, 5.0);
        let var_99 = math::percentile(&pnl, 1.0);
        let worst_case = pnl.iter().copied().fold(f64::INFINITY, f64::min);
        let current_pnl = current_spread_pnl(sell_bid, buy_ask, fee_rate);

        let action = recommend_action(
            current_pnl,
            prob_positive,
            expected_pnl,
            self.cfg.min_pnl,
            self.cfg.min_prob_positive,
        );

        debug!(
            prob_positive,
            expected_pnl,
            var_95,
            worst_case,
            %action,
            "Hold-period risk assessed"
        );

        RiskAssessment {
            current_pnl,
            prob_positive,
            expected_pnl,
            var_95,
            var_99,
            worst_case,
            action,
        }
    }

    /// Assess with the configured horizon and simulation count, estimating
    /// volatility from the given sell-side price history.
    pub fn assess(&mut self, sell_bid: f64, buy_ask: f64, sell_prices: &[f64]) -> RiskAssessment {
        let vol = volatility(sell_prices, VolatilityMethod::LogReturns);
        let (hold_days, n_simulations, drift) =
            (self.cfg.hold_days, self.cfg.n_simulations, self.cfg.drift);
        self.assess_hold_period_risk(sell_bid, buy_ask, vol, hold_days, n_simulations, drift)
    }

    /// Risk-adjusted score for an assessment under the configured execution
    /// probability and risk aversion.
    pub fn score(&self, assessment: &RiskAssessment) -> f64 {
        risk_adjusted_score(
            assessment.expected_pnl,
            assessment.prob_positive,
            assessment.var_95,
            self.cfg.execution_probability,
            self.cfg.risk_aversion,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RiskEngine {
        RiskEngine::with_seed(RiskConfig::default(), 42)
    }

    // -- Pure functions --

    #[test]
    fn test_current_spread_pnl() {
        // 10.0 * 0.85 - 8.5 = 0
        assert!(current_spread_pnl(10.0, 8.5, 0.15).abs() < 1e-12);
        // 10.0 * 0.85 - 8.6 = -0.1
        assert!((current_spread_pnl(10.0, 8.6, 0.15) + 0.1).abs() < 1e-12);
        // No fee: plain spread.
        assert!((current_spread_pnl(10.0, 8.0, 0.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_spread_pct() {
        assert!((spread_pct(0.85, 8.5) - 10.0).abs() < 1e-12);
        assert_eq!(spread_pct(1.0, 0.0), 0.0);
    }

    #[test]
    fn test_volatility_needs_two_prices() {
        assert_eq!(volatility(&[], VolatilityMethod::LogReturns), 0.0);
        assert_eq!(volatility(&[10.0], VolatilityMethod::LogReturns), 0.0);
    }

    #[test]
    fn test_volatility_constant_series_is_zero() {
        let prices = [5.0; 10];
        assert!(volatility(&prices, VolatilityMethod::LogReturns).abs() < 1e-12);
        assert!(volatility(&prices, VolatilityMethod::SimpleReturns).abs() < 1e-12);
    }

    #[test]
    fn test_volatility_log_vs_simple() {
        let prices = [100.0, 110.0, 99.0, 105.0, 103.0];
        let log_vol = volatility(&prices, VolatilityMethod::LogReturns);
        let simple_vol = volatility(&prices, VolatilityMethod::SimpleReturns);
        assert!(log_vol > 0.0);
        assert!(simple_vol > 0.0);
        // Same data, slightly different return definitions.
        assert!((log_vol - simple_vol).abs() < 0.05);
        assert!((log_vol - simple_vol).abs() > 1e-6);
    }

    #[test]
    fn test_volatility_alternating_known_value() {
        // Simple returns alternate +10% / -9.0909..%; population σ of the
        // two distinct return values is half their spread.
        let prices = [10.0, 11.0, 10.0, 11.0, 10.0];
        let vol = volatility(&prices, VolatilityMethod::SimpleReturns);
        let up: f64 = 0.1;
        let down: f64 = -1.0 / 11.0;
        let expected = (up - down) / 2.0;
        assert!((vol - expected).abs() < 1e-9);
    }

    #[test]
    fn test_risk_adjusted_score_monotonic_in_expected_pnl() {
        let low = risk_adjusted_score(1.0, 0.7, -2.0, 0.6, 0.5);
        let high = risk_adjusted_score(2.0, 0.7, -2.0, 0.6, 0.5);
        assert!(high > low);
    }

    #[test]
    fn test_risk_adjusted_score_decreasing_in_risk_aversion() {
        // With var_95 < 0 and prob_positive < 1, more aversion = lower score.
        let tolerant = risk_adjusted_score(1.0, 0.7, -2.0, 0.6, 0.1);
        let averse = risk_adjusted_score(1.0, 0.7, -2.0, 0.6, 0.9);
        assert!(averse < tolerant);
    }

    #[test]
    fn test_risk_adjusted_score_formula() {
        // 1.0*0.6 - |−2.0|*(1−0.7)*0.5 = 0.6 − 0.3 = 0.3
        let score = risk_adjusted_score(1.0, 0.7, -2.0, 0.6, 0.5);
        assert!((score - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_recommend_action_skip_on_thin_spread() {
        // Current spread below the floor: holding-period risk is irrelevant.
        let action = recommend_action(0.2, 0.99, 10.0, 0.5, 0.6);
        assert_eq!(action, Action::Skip);
    }

    #[test]
    fn test_recommend_action_monitor_on_low_probability() {
        let action = recommend_action(1.0, 0.4, 1.0, 0.5, 0.6);
        assert_eq!(action, Action::Monitor);
    }

    #[test]
    fn test_recommend_action_monitor_on_low_expected_pnl() {
        let action = recommend_action(1.0, 0.9, 0.2, 0.5, 0.6);
        assert_eq!(action, Action::Monitor);
    }

    #[test]
    fn test_recommend_action_candidate() {
        let action = recommend_action(1.0, 0.9, 1.0, 0.5, 0.6);
        assert_eq!(action, Action::Candidate);
    }

    // -- Simulation --

    #[test]
    fn test_simulation_returns_full_vector() {
        let mut engine = engine();
        let prices = engine.simulate_holding_period(10.0, 0.05, 3, 1000, 0.0);
        assert_eq!(prices.len(), 1000);
        assert!(prices.iter().all(|p| *p > 0.0));
    }

    #[test]
    fn test_simulation_zero_volatility_is_deterministic() {
        let mut engine = engine();
        let prices = engine.simulate_holding_period(10.0, 0.0, 7, 100, 0.0);
        assert!(prices.iter().all(|p| (p - 10.0).abs() < 1e-12));
    }

    #[test]
    fn test_monte_carlo_calibration() {
        // With drift 0, ln(P_T / P_0) is normal with mean -0.5σ²h and
        // standard deviation σ√h. 50k draws pin both to tight tolerance.
        let mut engine = engine();
        let (sigma, hold_days, n) = (0.05_f64, 3_u32, 50_000_usize);
        let prices = engine.simulate_holding_period(10.0, sigma, hold_days, n, 0.0);

        let log_ratios: Vec<f64> = prices.iter().map(|p| (p / 10.0).ln()).collect();
        let target_mean = -0.5 * sigma * sigma * f64::from(hold_days);
        let target_sd = sigma * f64::from(hold_days).sqrt();

        assert!((math::mean(&log_ratios) - target_mean).abs() < 2e-3);
        assert!((math::std_dev(&log_ratios) - target_sd).abs() < 2e-3);
    }

    #[test]
    fn test_positive_drift_raises_terminal_prices() {
        let mut a = RiskEngine::with_seed(RiskConfig::default(), 7);
        let mut b = RiskEngine::with_seed(RiskConfig::default(), 7);
        let flat = a.simulate_holding_period(10.0, 0.05, 5, 20_000, 0.0);
        let drifted = b.simulate_holding_period(10.0, 0.05, 5, 20_000, 0.01);
        assert!(math::mean(&drifted) > math::mean(&flat));
    }

    // -- Assessment --

    #[test]
    fn test_assess_zero_volatility_collapses_distribution() {
        let mut engine = engine();
        // Fee-adjusted PnL is exactly 10*0.85 - 8.0 = 0.5 in every draw.
        let assessment = engine.assess_hold_period_risk(10.0, 8.0, 0.0, 7, 1000, 0.0);
        assert!((assessment.expected_pnl - 0.5).abs() < 1e-12);
        assert!((assessment.current_pnl - 0.5).abs() < 1e-12);
        assert!((assessment.var_95 - 0.5).abs() < 1e-12);
        assert!((assessment.var_99 - 0.5).abs() < 1e-12);
        assert!((assessment.worst_case - 0.5).abs() < 1e-12);
        assert!((assessment.prob_positive - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_assess_metrics_are_ordered() {
        let mut engine = engine();
        let a = engine.assess_hold_period_risk(10.0, 8.0, 0.08, 7, 20_000, 0.0);
        // Worst ≤ VaR99 ≤ VaR95 ≤ expected for a wide distribution.
        assert!(a.worst_case <= a.var_99);
        assert!(a.var_99 <= a.var_95);
        assert!(a.var_95 <= a.expected_pnl);
        assert!(a.prob_positive > 0.0 && a.prob_positive < 1.0);
    }

    #[test]
    fn test_assess_action_uses_current_pnl_gate() {
        let mut engine = engine();
        // Thin current spread (10*0.85 - 8.45 = 0.05 < 0.5 floor) → skip,
        // regardless of the simulated distribution.
        let a = engine.assess_hold_period_risk(10.0, 8.45, 0.02, 7, 5_000, 0.0);
        assert_eq!(a.action, Action::Skip);
    }

    #[test]
    fn test_assess_from_history() {
        let mut engine = engine();
        let history = [9.8, 10.1, 9.9, 10.2, 10.0];
        let a = engine.assess(10.0, 7.5, &history);
        // Mild volatility around a 1.0 spread: a strong opportunity.
        assert!((a.current_pnl - 1.0).abs() < 1e-12);
        assert!(a.prob_positive > 0.9);
        assert_eq!(a.action, Action::Candidate);
    }

    #[test]
    fn test_score_uses_configured_weights() {
        let engine = engine();
        let assessment = RiskAssessment {
            current_pnl: 0.5,
            prob_positive: 0.7,
            expected_pnl: 1.0,
            var_95: -2.0,
            var_99: -3.0,
            worst_case: -4.0,
            action: Action::Candidate,
        };
        // Defaults: exec prob 0.6, risk aversion 0.5.
        assert!((engine.score(&assessment) - 0.3).abs() < 1e-12);
    }
}
