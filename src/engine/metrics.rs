//! Latency, slippage, and edge-capture statistics recorded on every fill,
//! plus counters for submissions that never produced a fill.

use tracing::info;

use crate::types::ExecutionFailure;

const AUTO_LOG_MIN_RECORDS: usize = 3;
const AUTO_LOG_INTERVAL_MS: i64 = 5 * 60 * 1000;

/// Count of execution failures seen so far, broken out by category.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureCounts {
    pub auth_blocked: u64,
    pub rate_limited: u64,
    pub timeout: u64,
    pub insufficient_balance: u64,
    pub other: u64,
}

impl FailureCounts {
    pub fn total(&self) -> u64 {
        self.auth_blocked + self.rate_limited + self.timeout + self.insufficient_balance + self.other
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TradeMetric {
    pub latency_ms: i64,
    pub slippage_cents: f64,
    pub expected_edge: f64,
    pub realised_edge: f64,
    pub mid_move_pct: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LatencySummary {
    pub min_ms: i64,
    pub mean_ms: f64,
    pub p50_ms: i64,
    pub p95_ms: i64,
    pub max_ms: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SlippageSummary {
    pub min_cents: f64,
    pub mean_cents: f64,
    pub p50_cents: f64,
    pub p95_cents: f64,
    pub max_cents: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeCaptureSummary {
    pub mean_expected: f64,
    pub mean_realised: f64,
    pub capture_ratio: f64,
}

#[derive(Default)]
pub struct ExecutionMetrics {
    records: Vec<TradeMetric>,
    last_auto_log_ms: i64,
    failures: FailureCounts,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, metric: TradeMetric, now_ms: i64) {
        self.records.push(metric);
        self.maybe_auto_log(now_ms);
    }

    /// Records a submission that did not result in a fill — a rejection
    /// from the venue, or a local timeout waiting on one.
    pub fn record_failure(&mut self, failure: &ExecutionFailure) {
        match failure {
            ExecutionFailure::AuthBlocked => self.failures.auth_blocked += 1,
            ExecutionFailure::RateLimited => self.failures.rate_limited += 1,
            ExecutionFailure::Timeout => self.failures.timeout += 1,
            ExecutionFailure::InsufficientBalance => self.failures.insufficient_balance += 1,
            ExecutionFailure::Other(_) => self.failures.other += 1,
        }
    }

    pub fn failure_counts(&self) -> FailureCounts {
        self.failures
    }

    fn maybe_auto_log(&mut self, now_ms: i64) {
        if self.records.len() < AUTO_LOG_MIN_RECORDS {
            return;
        }
        if now_ms - self.last_auto_log_ms < AUTO_LOG_INTERVAL_MS {
            return;
        }
        let latency = self.latency_summary();
        let edge = self.edge_capture_summary();
        info!(
            n = self.records.len(),
            p50_latency_ms = latency.p50_ms,
            p95_latency_ms = latency.p95_ms,
            capture_ratio = edge.capture_ratio,
            "execution metrics snapshot"
        );
        self.last_auto_log_ms = now_ms;
    }

    pub fn latency_summary(&self) -> LatencySummary {
        if self.records.is_empty() {
            return LatencySummary::default();
        }
        let mut values: Vec<i64> = self.records.iter().map(|r| r.latency_ms).collect();
        values.sort();
        LatencySummary {
            min_ms: values[0],
            mean_ms: mean(&values.iter().map(|v| *v as f64).collect::<Vec<_>>()),
            p50_ms: percentile(&values, 0.50),
            p95_ms: percentile(&values, 0.95),
            max_ms: *values.last().unwrap(),
        }
    }

    pub fn slippage_summary(&self) -> SlippageSummary {
        if self.records.is_empty() {
            return SlippageSummary::default();
        }
        let mut values: Vec<f64> = self.records.iter().map(|r| r.slippage_cents).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        SlippageSummary {
            min_cents: values[0],
            mean_cents: mean(&values),
            p50_cents: percentile_f64(&values, 0.50),
            p95_cents: percentile_f64(&values, 0.95),
            max_cents: *values.last().unwrap(),
        }
    }

    pub fn edge_capture_summary(&self) -> EdgeCaptureSummary {
        if self.records.is_empty() {
            return EdgeCaptureSummary::default();
        }
        let expected: Vec<f64> = self.records.iter().map(|r| r.expected_edge).collect();
        let realised: Vec<f64> = self.records.iter().map(|r| r.realised_edge).collect();
        let mean_expected = mean(&expected);
        let mean_realised = mean(&realised);
        let capture_ratio = if mean_expected.abs() > f64::EPSILON {
            mean_realised / mean_expected
        } else {
            0.0
        };
        EdgeCaptureSummary { mean_expected, mean_realised, capture_ratio }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn percentile(sorted: &[i64], q: f64) -> i64 {
    let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn percentile_f64(sorted: &[f64], q: f64) -> f64 {
    let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
