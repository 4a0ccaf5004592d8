use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which outcome token a position or signal refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Up,
    Down,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Up => Side::Down,
            Side::Down => Side::Up,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Up => write!(f, "UP"),
            Side::Down => write!(f, "DOWN"),
        }
    }
}

/// A 15-minute binary outcome market.
#[derive(Debug, Clone)]
pub struct Market {
    pub condition_id: String,
    pub slug: String,
    pub up_token_id: String,
    pub down_token_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub tick_size: Decimal,
    pub neg_risk: bool,
    pub strike: Option<f64>,
    pub settlement_source: String,
}

impl Market {
    pub fn time_left_s(&self, now_ms: i64) -> f64 {
        ((self.end_ms - now_ms).max(0)) as f64 / 1000.0
    }

    pub fn has_started(&self, now_ms: i64) -> bool {
        now_ms >= self.start_ms
    }

    pub fn has_ended(&self, now_ms: i64) -> bool {
        now_ms >= self.end_ms
    }
}

/// Top-of-book snapshot for a market's YES and NO outcome tokens.
#[derive(Debug, Clone, Copy)]
pub struct OrderBookSnapshot {
    pub yes_bid: f64,
    pub yes_ask: f64,
    pub yes_ask_size: f64,
    pub no_bid: f64,
    pub no_ask: f64,
    pub no_ask_size: f64,
    pub timestamp_ms: i64,
}

impl OrderBookSnapshot {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        (now_ms - self.timestamp_ms) <= 10_000
    }

    pub fn is_valid(&self) -> bool {
        self.yes_bid >= 0.0
            && self.yes_ask >= self.yes_bid
            && self.no_bid >= 0.0
            && self.no_ask >= self.no_bid
            && self.yes_ask_size >= 0.0
            && self.no_ask_size >= 0.0
    }
}

/// A reference-exchange mid-price tick.
#[derive(Debug, Clone, Copy)]
pub struct PriceTick {
    pub bid: f64,
    pub ask: f64,
    pub timestamp_ms: i64,
}

impl PriceTick {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// Output of the fair-value pricer for a single evaluation.
#[derive(Debug, Clone, Copy)]
pub struct FairValue {
    pub p_up: f64,
    pub p_down: f64,
    pub d: f64,
    pub sigma_sqrt_tau: f64,
}

/// A qualifying trade candidate, prior to sizing.
#[derive(Debug, Clone, Copy)]
pub struct Signal {
    pub side: Side,
    pub edge: f64,
    pub fair_value: f64,
    pub market_price: f64,
    pub now_ms: i64,
}

/// A trade record kept for post-resolution edge-capture analysis.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub side: Side,
    pub fill_price: f64,
    pub size: f64,
    pub fair_value_at_signal: f64,
    pub expected_edge: f64,
    pub timestamp_ms: i64,
}

/// A market awaiting settlement, with every trade accrued against it.
#[derive(Debug, Clone)]
pub struct PendingResolution {
    pub condition_id: String,
    pub strike: f64,
    pub end_ms: i64,
    pub trades: Vec<TradeRecord>,
}

/// A resolved trade, carrying its realised outcome.
#[derive(Debug, Clone)]
pub struct ResolvedTrade {
    pub condition_id: String,
    pub record: TradeRecord,
    pub won: bool,
    pub realised_return: f64,
}

/// Final settlement outcome of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Up,
    Down,
    Unresolved,
}

/// Parameters for an immediate-or-cancel buy order.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub token_id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
    pub tick_size: Decimal,
    pub neg_risk: bool,
}

/// Outcome of submitting an order to the execution collaborator.
#[derive(Debug, Clone)]
pub enum OrderResult {
    Filled { order_id: String, fill_price: f64, fill_size: f64 },
    Rejected { reason: ExecutionFailure },
}

/// Coarse classification of execution failures, used for compact logging
/// and failure counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    AuthBlocked,
    RateLimited,
    Timeout,
    InsufficientBalance,
    Other(String),
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionFailure::AuthBlocked => write!(f, "auth_blocked"),
            ExecutionFailure::RateLimited => write!(f, "rate_limited"),
            ExecutionFailure::Timeout => write!(f, "timeout"),
            ExecutionFailure::InsufficientBalance => write!(f, "insufficient_balance"),
            ExecutionFailure::Other(s) => write!(f, "other({})", s),
        }
    }
}

/// Persisted divergence-tracker state, written on orderly shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DivergenceState {
    #[serde(rename = "emaValue")]
    pub ema_value: f64,
    #[serde(rename = "emaInitialized")]
    pub ema_initialized: bool,
    #[serde(rename = "savedAt")]
    pub saved_at_ms: i64,
}
