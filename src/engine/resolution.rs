//! Tracks trades awaiting settlement and computes realised-vs-expected
//! edge once a market's outcome is known.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::warn;

use crate::types::{Outcome, PendingResolution, ResolvedTrade, Side, TradeRecord};

const DEFAULT_GRACE_MS: i64 = 2 * 60 * 1000;

/// External collaborator that knows the final outcome of a settled
/// market. Out of scope here is how it learns that (on-chain event,
/// venue API poll, etc).
#[async_trait]
pub trait ResolutionSource: Send + Sync {
    async fn outcome(&self, condition_id: &str) -> Outcome;
}

pub struct ResolutionTracker {
    grace_ms: i64,
    pending: Vec<PendingResolution>,
    resolved: Vec<ResolvedTrade>,
    resolved_condition_ids: HashSet<String>,
    scan_in_progress: bool,
}

impl Default for ResolutionTracker {
    fn default() -> Self {
        Self {
            grace_ms: DEFAULT_GRACE_MS,
            pending: Vec::new(),
            resolved: Vec::new(),
            resolved_condition_ids: HashSet::new(),
            scan_in_progress: false,
        }
    }
}

impl ResolutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grace_ms(grace_ms: i64) -> Self {
        Self { grace_ms, ..Self::default() }
    }

    /// Enqueue a market, and every trade made against it, for later
    /// outcome lookup. Called before the position manager is reset on
    /// market switch, so nothing accrued is lost.
    pub fn enqueue(&mut self, pending: PendingResolution) {
        if self.resolved_condition_ids.contains(&pending.condition_id) {
            return;
        }
        self.pending.push(pending);
    }

    /// Scan pending entries whose grace period has elapsed and resolve
    /// them against `source`. Single-flighted: a scan already in
    /// progress makes this call a no-op.
    pub async fn scan(&mut self, now_ms: i64, source: &dyn ResolutionSource) {
        if self.scan_in_progress {
            return;
        }
        self.scan_in_progress = true;

        let mut remaining = Vec::new();
        let due: Vec<PendingResolution> = self
            .pending
            .drain(..)
            .filter(|p| {
                if now_ms >= p.end_ms + self.grace_ms {
                    true
                } else {
                    remaining.push(p.clone());
                    false
                }
            })
            .collect();
        self.pending = remaining;

        for market in due {
            if self.resolved_condition_ids.contains(&market.condition_id) {
                continue;
            }
            let outcome = source.outcome(&market.condition_id).await;
            match outcome {
                Outcome::Unresolved => {
                    warn!(condition_id = %market.condition_id, "resolution still unresolved, retrying next scan");
                    self.pending.push(market);
                }
                Outcome::Up | Outcome::Down => {
                    self.resolve_market(market, outcome);
                }
            }
        }

        self.scan_in_progress = false;
    }

    fn resolve_market(&mut self, market: PendingResolution, outcome: Outcome) {
        let winning_side = match outcome {
            Outcome::Up => Side::Up,
            Outcome::Down => Side::Down,
            Outcome::Unresolved => unreachable!(),
        };

        for record in market.trades {
            let won = record.side == winning_side;
            let payout = if won { 1.0 } else { 0.0 };
            let realised_return = payout - record.fill_price;
            self.resolved.push(ResolvedTrade {
                condition_id: market.condition_id.clone(),
                record,
                won,
                realised_return,
            });
        }
        self.resolved_condition_ids.insert(market.condition_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> ResolutionStats {
        if self.resolved.is_empty() {
            return ResolutionStats::default();
        }

        let total_trades = self.resolved.len();
        let total_markets = self.resolved_condition_ids.len();
        let wins = self.resolved.iter().filter(|r| r.won).count();
        let losses = total_trades - wins;

        let mean_expected = mean(self.resolved.iter().map(|r| r.record.expected_edge));
        let mean_realised = mean(self.resolved.iter().map(|r| r.realised_return));
        let edge_capture = if mean_expected.abs() > f64::EPSILON {
            mean_realised / mean_expected
        } else {
            0.0
        };

        let winning_realised = mean(self.resolved.iter().filter(|r| r.won).map(|r| r.realised_return));
        let losing_realised = mean(self.resolved.iter().filter(|r| !r.won).map(|r| r.realised_return));

        ResolutionStats {
            total_trades,
            total_markets,
            wins,
            losses,
            mean_expected_edge: mean_expected,
            mean_realised_return: mean_realised,
            edge_capture,
            mean_realised_winning: winning_realised,
            mean_realised_losing: losing_realised,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolutionStats {
    pub total_trades: usize,
    pub total_markets: usize,
    pub wins: usize,
    pub losses: usize,
    pub mean_expected_edge: f64,
    pub mean_realised_return: f64,
    pub edge_capture: f64,
    pub mean_realised_winning: f64,
    pub mean_realised_losing: f64,
}
