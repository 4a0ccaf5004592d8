//! Tracks the systematic gap between the exchange price used for pricing
//! and the on-chain oracle price used for settlement, and exposes a
//! smoothed correction to apply to the modelled spot.

use std::collections::VecDeque;
use std::path::Path;

use crate::errors::PersistenceError;
use crate::types::DivergenceState;

const DEFAULT_WINDOW_MS: i64 = 2 * 3600 * 1000;
const MIN_RELIABLE_SAMPLES: usize = 30;
const PERSISTED_STATE_MAX_AGE_MS: i64 = 2 * 3600 * 1000;
const HALF_LIFE_SAMPLES: f64 = 30.0;

/// alpha = 1 - exp(-ln(2)/half_life): smoothing factor for an EMA with
/// the given half-life in samples.
fn ema_alpha() -> f64 {
    1.0 - (-std::f64::consts::LN_2 / HALF_LIFE_SAMPLES).exp()
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    t_ms: i64,
    d: f64,
}

/// Rolling buffer of exchange-minus-oracle samples plus an EMA of the gap.
pub struct DivergenceTracker {
    window_ms: i64,
    static_fallback: f64,
    samples: VecDeque<Sample>,
    ema: f64,
    ema_initialized: bool,
    ema_restored_at_ms: Option<i64>,
}

impl DivergenceTracker {
    pub fn new(static_fallback: f64) -> Self {
        Self::with_window(static_fallback, DEFAULT_WINDOW_MS)
    }

    pub fn with_window(static_fallback: f64, window_ms: i64) -> Self {
        Self {
            window_ms,
            static_fallback,
            samples: VecDeque::new(),
            ema: 0.0,
            ema_initialized: false,
            ema_restored_at_ms: None,
        }
    }

    /// Record one (exchange, oracle) pair observed at `now_ms`.
    pub fn observe(&mut self, now_ms: i64, s_exchange: f64, s_oracle: f64) {
        let d = s_exchange - s_oracle;
        self.samples.push_back(Sample { t_ms: now_ms, d });
        self.evict(now_ms);

        if self.ema_initialized {
            let alpha = ema_alpha();
            self.ema = alpha * d + (1.0 - alpha) * self.ema;
        } else {
            self.ema = d;
            self.ema_initialized = true;
        }
    }

    fn evict(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        while self.samples.front().map_or(false, |s| s.t_ms < cutoff) {
            self.samples.pop_front();
        }
    }

    pub fn has_reliable_data(&self, now_ms: i64) -> bool {
        if self.samples.len() >= MIN_RELIABLE_SAMPLES {
            return true;
        }
        match self.ema_restored_at_ms {
            Some(restored_at) => (now_ms - restored_at) < PERSISTED_STATE_MAX_AGE_MS,
            None => false,
        }
    }

    pub fn rolling_mean_adjustment(&self) -> f64 {
        if self.samples.is_empty() {
            return self.static_fallback;
        }
        let mean = self.samples.iter().map(|s| s.d).sum::<f64>() / self.samples.len() as f64;
        -mean
    }

    pub fn median_adjustment(&self) -> f64 {
        if self.samples.is_empty() {
            return self.static_fallback;
        }
        let mut ds: Vec<f64> = self.samples.iter().map(|s| s.d).collect();
        ds.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mid = ds.len() / 2;
        let median = if ds.len() % 2 == 0 {
            (ds[mid - 1] + ds[mid]) / 2.0
        } else {
            ds[mid]
        };
        -median
    }

    pub fn ema_adjustment(&self) -> f64 {
        if !self.ema_initialized {
            return self.static_fallback;
        }
        -self.ema
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Snapshot suitable for writing to the persisted state file.
    pub fn to_state(&self, now_ms: i64) -> DivergenceState {
        DivergenceState {
            ema_value: self.ema,
            ema_initialized: self.ema_initialized,
            saved_at_ms: now_ms,
        }
    }

    /// Restore EMA-only state (the sample buffer itself is not persisted;
    /// it rebuilds from live polling). Rejects state older than the
    /// 2-hour freshness window.
    pub fn restore(&mut self, state: DivergenceState, now_ms: i64) -> Result<(), PersistenceError> {
        if now_ms - state.saved_at_ms > PERSISTED_STATE_MAX_AGE_MS {
            return Err(PersistenceError::Stale { max_age_s: PERSISTED_STATE_MAX_AGE_MS / 1000 });
        }
        self.ema = state.ema_value;
        self.ema_initialized = state.ema_initialized;
        self.ema_restored_at_ms = Some(now_ms);
        Ok(())
    }

    /// Load persisted state from `path` and restore it if still fresh.
    /// Any failure (missing file, corrupt json, stale) is treated as a
    /// cold start.
    pub fn load_from(&mut self, path: &Path, now_ms: i64) {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return,
        };
        let state: DivergenceState = match serde_json::from_str(&contents) {
            Ok(s) => s,
            Err(_) => return,
        };
        let _ = self.restore(state, now_ms);
    }

    /// Persist current EMA state to `path`.
    pub fn save_to(&self, path: &Path, now_ms: i64) -> Result<(), PersistenceError> {
        let state = self.to_state(now_ms);
        let json = serde_json::to_string_pretty(&state)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: buffer empty, EMA never initialised.
    /// Expected: all accessors fall back to the configured static value.
    #[test]
    fn cold_tracker_uses_static_fallback() {
        let tracker = DivergenceTracker::new(12.5);
        assert_eq!(tracker.rolling_mean_adjustment(), 12.5);
        assert_eq!(tracker.median_adjustment(), 12.5);
        assert_eq!(tracker.ema_adjustment(), 12.5);
        assert!(!tracker.has_reliable_data(0));
    }

    /// Scenario: one sample observed, exchange above oracle by 10.
    /// Expected: mean/ema adjustment is -10 (subtract the observed gap).
    #[test]
    fn single_sample_sets_ema_directly() {
        let mut tracker = DivergenceTracker::new(0.0);
        tracker.observe(1_000, 100_010.0, 100_000.0);
        assert_eq!(tracker.ema_adjustment(), -10.0);
        assert_eq!(tracker.rolling_mean_adjustment(), -10.0);
    }

    /// Scenario: exactly 30 samples observed.
    /// Expected: has_reliable_data becomes true without any persisted state.
    #[test]
    fn reliable_after_thirty_samples() {
        let mut tracker = DivergenceTracker::new(0.0);
        for i in 0..30 {
            tracker.observe(i * 1000, 100_000.0, 100_000.0 + i as f64);
        }
        assert!(tracker.has_reliable_data(30_000));
    }

    /// Scenario: samples older than the 2h window.
    /// Expected: they are evicted and no longer count toward reliability
    /// or the mean/median accessors.
    #[test]
    fn old_samples_are_evicted() {
        let mut tracker = DivergenceTracker::with_window(0.0, 1_000);
        tracker.observe(0, 100_010.0, 100_000.0);
        tracker.observe(5_000, 100_000.0, 100_000.0);
        assert_eq!(tracker.sample_count(), 1);
        assert_eq!(tracker.rolling_mean_adjustment(), 0.0);
    }

    /// Scenario: save then load within the 2h freshness window.
    /// Expected: EMA value is preserved and reliability is granted
    /// immediately, without any fresh samples.
    #[test]
    fn persisted_state_round_trips_within_freshness_window() {
        let mut tracker = DivergenceTracker::new(0.0);
        tracker.observe(0, 100_020.0, 100_000.0);
        let state = tracker.to_state(1_000);

        let mut restored = DivergenceTracker::new(0.0);
        let result = restored.restore(state, 2_000);
        assert!(result.is_ok());
        assert_eq!(restored.ema_adjustment(), -20.0);
        assert!(restored.has_reliable_data(2_000));
    }

    /// Scenario: persisted state older than 2 hours.
    /// Expected: restore() rejects it and the tracker stays cold.
    #[test]
    fn stale_persisted_state_is_rejected() {
        let state = DivergenceState {
            ema_value: -5.0,
            ema_initialized: true,
            saved_at_ms: 0,
        };
        let mut tracker = DivergenceTracker::new(1.0);
        let result = tracker.restore(state, 3 * 3600 * 1000);
        assert!(result.is_err());
        assert_eq!(tracker.ema_adjustment(), 1.0);
    }

    /// Scenario: an outlier sample among otherwise tight observations.
    /// Expected: median is less perturbed by the outlier than the mean.
    #[test]
    fn median_is_more_robust_than_mean_to_outliers() {
        let mut tracker = DivergenceTracker::new(0.0);
        for i in 0..9 {
            tracker.observe(i * 1000, 100_000.0, 100_000.0);
        }
        tracker.observe(9_000, 101_000.0, 100_000.0);
        let mean_adj = tracker.rolling_mean_adjustment();
        let median_adj = tracker.median_adjustment();
        assert!(median_adj.abs() < mean_adj.abs());
    }

    /// Scenario: round-trip through the filesystem.
    /// Expected: save_to followed by load_from on a fresh tracker
    /// reproduces the EMA value.
    #[test]
    fn save_and_load_round_trip_via_filesystem() {
        let dir = std::env::temp_dir().join(format!("divergence_test_{:p}", &0));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("divergence_state.json");

        let mut tracker = DivergenceTracker::new(0.0);
        tracker.observe(0, 100_007.0, 100_000.0);
        tracker.save_to(&path, 1_000).unwrap();

        let mut loaded = DivergenceTracker::new(0.0);
        loaded.load_from(&path, 2_000);
        assert_eq!(loaded.ema_adjustment(), -7.0);

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }
}
