//! Holds the strike price for the active market. A deliberate latch:
//! once set, later fetches are no-ops.

use async_trait::async_trait;

/// External collaborator that can look up a strike for a market, by
/// whatever means the venue exposes (price-at-open endpoint, on-chain
/// oracle round). Out of scope here is the transport itself.
#[async_trait]
pub trait StrikeSource: Send + Sync {
    async fn fetch(&self, condition_id: &str) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrikeOrigin {
    Unset,
    Manual,
    Fetched,
}

pub struct StrikeService {
    origin: StrikeOrigin,
    value: f64,
    fetch_in_flight: bool,
}

impl Default for StrikeService {
    fn default() -> Self {
        Self {
            origin: StrikeOrigin::Unset,
            value: 0.0,
            fetch_in_flight: false,
        }
    }
}

impl StrikeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_strike(&self) -> bool {
        self.origin != StrikeOrigin::Unset
    }

    pub fn get_strike(&self) -> f64 {
        self.value
    }

    /// Operator-provided override. Wins over any later fetch.
    pub fn set_manual(&mut self, price: f64) {
        self.origin = StrikeOrigin::Manual;
        self.value = price;
    }

    /// Idempotent: a no-op once a strike is already set (manual or
    /// fetched), and at-most-one concurrent fetch is allowed.
    pub async fn fetch_and_set(&mut self, condition_id: &str, source: &dyn StrikeSource) {
        if self.has_strike() || self.fetch_in_flight {
            return;
        }
        self.fetch_in_flight = true;
        let fetched = source.fetch(condition_id).await;
        self.fetch_in_flight = false;

        if let Some(price) = fetched {
            if !self.has_strike() {
                self.origin = StrikeOrigin::Fetched;
                self.value = price;
            }
        }
    }

    pub fn reset(&mut self) {
        self.origin = StrikeOrigin::Unset;
        self.value = 0.0;
        self.fetch_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        answer: Option<f64>,
    }

    #[async_trait]
    impl StrikeSource for CountingSource {
        async fn fetch(&self, _condition_id: &str) -> Option<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    /// Scenario: fresh service, no strike set.
    /// Expected: has_strike is false and get_strike reads zero.
    #[test]
    fn starts_unset() {
        let svc = StrikeService::new();
        assert!(!svc.has_strike());
        assert_eq!(svc.get_strike(), 0.0);
    }

    /// Scenario: manual strike set by the operator.
    /// Expected: has_strike becomes true and a subsequent fetch is a no-op.
    #[tokio::test]
    async fn manual_strike_wins_over_fetch() {
        let mut svc = StrikeService::new();
        svc.set_manual(99_500.0);

        let source = CountingSource { calls: AtomicUsize::new(0), answer: Some(1.0) };
        svc.fetch_and_set("cond", &source).await;

        assert_eq!(svc.get_strike(), 99_500.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    /// Scenario: venue fetch succeeds on first call.
    /// Expected: strike is set and a second fetch_and_set is a no-op.
    #[tokio::test]
    async fn fetch_is_idempotent_once_set() {
        let mut svc = StrikeService::new();
        let source = CountingSource { calls: AtomicUsize::new(0), answer: Some(100_000.0) };

        svc.fetch_and_set("cond", &source).await;
        assert_eq!(svc.get_strike(), 100_000.0);

        svc.fetch_and_set("cond", &source).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    /// Scenario: fetch source returns no data.
    /// Expected: the service remains unset so a later fetch can retry.
    #[tokio::test]
    async fn failed_fetch_leaves_service_unset() {
        let mut svc = StrikeService::new();
        let source = CountingSource { calls: AtomicUsize::new(0), answer: None };

        svc.fetch_and_set("cond", &source).await;
        assert!(!svc.has_strike());

        svc.fetch_and_set("cond", &source).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    /// Scenario: market switch.
    /// Expected: reset() clears the latch so the next market can fetch fresh.
    #[test]
    fn reset_clears_latch() {
        let mut svc = StrikeService::new();
        svc.set_manual(5.0);
        svc.reset();
        assert!(!svc.has_strike());
        assert_eq!(svc.get_strike(), 0.0);
    }
}
