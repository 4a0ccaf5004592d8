//! Blended short-horizon volatility, refreshed on a timer from realised
//! and implied sources.

const MIN_SIGMA: f64 = 0.10;
const MAX_SIGMA: f64 = 3.00;
const MINUTES_PER_YEAR: f64 = 525_600.0;
const DEFAULT_IMPLIED: f64 = 0.50;

/// Realised sigma from a window of one-minute closes, annualised.
///
/// `closes` must be in chronological order; returns `None` if fewer than
/// two closes are available (no return can be computed).
pub fn realized_sigma(closes: &[f64]) -> Option<f64> {
    if closes.len() < 2 {
        return None;
    }
    let log_returns: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[1] / w[0]).ln())
        .collect();

    let n = log_returns.len() as f64;
    let mean = log_returns.iter().sum::<f64>() / n;
    let variance = log_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
    let per_minute_sigma = variance.sqrt();

    Some(per_minute_sigma * MINUTES_PER_YEAR.sqrt())
}

/// Rolling volatility state, refreshed every two minutes from an external
/// closes feed and an implied-volatility source.
#[derive(Debug, Clone)]
pub struct VolatilityState {
    pub realized_1h: f64,
    pub realized_4h: f64,
    pub implied_30d: f64,
    pub short_implied: Option<f64>,
    pub last_refresh_ms: i64,
}

impl Default for VolatilityState {
    fn default() -> Self {
        Self {
            realized_1h: 0.0,
            realized_4h: 0.0,
            implied_30d: DEFAULT_IMPLIED,
            short_implied: None,
            last_refresh_ms: 0,
        }
    }
}

impl VolatilityState {
    /// Apply a refresh. `closes_1h`/`closes_4h` are one-minute closes over
    /// the respective trailing window; `implied_30d` and `short_implied`
    /// come from an options-implied-vol source. A failed refresh should
    /// simply not call this method — the prior state is retained by
    /// construction.
    pub fn refresh(
        &mut self,
        closes_1h: &[f64],
        closes_4h: &[f64],
        implied_30d: f64,
        short_implied: Option<f64>,
        now_ms: i64,
    ) {
        if let Some(sigma) = realized_sigma(closes_1h) {
            self.realized_1h = sigma.clamp(MIN_SIGMA, MAX_SIGMA);
        }
        if let Some(sigma) = realized_sigma(closes_4h) {
            self.realized_4h = sigma.clamp(MIN_SIGMA, MAX_SIGMA);
        }
        self.implied_30d = implied_30d.clamp(MIN_SIGMA, MAX_SIGMA);
        self.short_implied = short_implied.map(|v| v.clamp(MIN_SIGMA, MAX_SIGMA));
        self.last_refresh_ms = now_ms;
    }

    /// Blend the maintained realised/implied values for a given horizon,
    /// expressed in minutes to expiry. Always returns a value clamped to
    /// [0.10, 3.00].
    pub fn blend_for_horizon(&self, horizon_min: f64) -> f64 {
        let (realized_1h, realized_4h) = if self.realized_1h == 0.0 && self.realized_4h == 0.0 {
            (self.implied_30d, self.implied_30d)
        } else {
            (self.realized_1h, self.realized_4h)
        };

        let sigma_impl = self.short_implied.unwrap_or(self.implied_30d);

        let blended = if horizon_min <= 30.0 {
            0.70 * realized_1h + 0.20 * realized_4h + 0.10 * sigma_impl
        } else if horizon_min <= 240.0 {
            let w = horizon_min / 240.0;
            (1.0 - w) * realized_4h + w * sigma_impl
        } else if horizon_min <= 1440.0 {
            0.50 * realized_4h + 0.50 * sigma_impl
        } else {
            self.implied_30d
        };

        blended.clamp(MIN_SIGMA, MAX_SIGMA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_closes(n: usize, v: f64) -> Vec<f64> {
        vec![v; n]
    }

    /// Scenario: prices never move.
    /// Expected: realised sigma is exactly zero.
    #[test]
    fn realized_sigma_is_zero_for_flat_prices() {
        let closes = flat_closes(60, 100.0);
        assert_eq!(realized_sigma(&closes), Some(0.0));
    }

    /// Scenario: fewer than two closes supplied.
    /// Expected: None, since no return can be computed.
    #[test]
    fn realized_sigma_needs_at_least_two_closes() {
        assert_eq!(realized_sigma(&[]), None);
        assert_eq!(realized_sigma(&[100.0]), None);
    }

    /// Scenario: alternating up/down returns of known magnitude.
    /// Expected: annualised sigma is positive and finite.
    #[test]
    fn realized_sigma_is_positive_for_noisy_prices() {
        let mut closes = Vec::new();
        let mut p = 100.0;
        for i in 0..120 {
            p *= if i % 2 == 0 { 1.001 } else { 0.999 };
            closes.push(p);
        }
        let sigma = realized_sigma(&closes).unwrap();
        assert!(sigma > 0.0);
        assert!(sigma.is_finite());
    }

    /// Scenario: cold start, both realised windows still zero.
    /// Expected: blend falls back to the 30-day implied at every horizon.
    #[test]
    fn cold_start_falls_back_to_implied() {
        let state = VolatilityState {
            realized_1h: 0.0,
            realized_4h: 0.0,
            implied_30d: 0.42,
            short_implied: None,
            last_refresh_ms: 0,
        };
        assert!((state.blend_for_horizon(10.0) - 0.42).abs() < 1e-9);
        assert!((state.blend_for_horizon(2000.0) - 0.42).abs() < 1e-9);
    }

    /// Scenario: short horizon, all three components populated.
    /// Expected: blend matches the 0.70/0.20/0.10 weighting exactly.
    #[test]
    fn short_horizon_uses_documented_weights() {
        let state = VolatilityState {
            realized_1h: 0.60,
            realized_4h: 0.50,
            implied_30d: 0.40,
            short_implied: Some(0.45),
            last_refresh_ms: 0,
        };
        let expected = 0.70 * 0.60 + 0.20 * 0.50 + 0.10 * 0.45;
        assert!((state.blend_for_horizon(15.0) - expected).abs() < 1e-9);
    }

    /// Scenario: all three sigma sources agree on the same value, so every
    /// tier's weighted blend must reduce to that same value.
    /// Expected: the blend is continuous (exact, up to float rounding)
    /// across the 30/240/1440-minute tier boundaries.
    #[test]
    fn mid_horizon_interpolates_continuously() {
        let state = VolatilityState {
            realized_1h: 0.45,
            realized_4h: 0.45,
            implied_30d: 0.45,
            short_implied: None,
            last_refresh_ms: 0,
        };
        for horizon in [29.9, 30.0, 30.1, 239.9, 240.0, 240.1, 1439.9, 1440.0, 1440.1] {
            assert!((state.blend_for_horizon(horizon) - 0.45).abs() < 1e-9);
        }
    }

    /// Scenario: long horizon beyond 24h.
    /// Expected: blend equals the raw 30-day implied.
    #[test]
    fn long_horizon_uses_pure_implied() {
        let state = VolatilityState {
            realized_1h: 0.60,
            realized_4h: 0.50,
            implied_30d: 0.33,
            short_implied: None,
            last_refresh_ms: 0,
        };
        assert!((state.blend_for_horizon(2000.0) - 0.33).abs() < 1e-9);
    }

    /// Scenario: a pathological implied value outside the allowed band.
    /// Expected: refresh clamps it into [0.10, 3.00].
    #[test]
    fn refresh_clamps_extreme_implied() {
        let mut state = VolatilityState::default();
        state.refresh(&[], &[], 9.0, None, 1_000);
        assert_eq!(state.implied_30d, 3.00);
        state.refresh(&[], &[], 0.001, None, 2_000);
        assert_eq!(state.implied_30d, 0.10);
    }
}
