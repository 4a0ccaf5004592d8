//! Single-threaded tick handler and decision loop: pulls sigma and
//! divergence, prices both sides, applies the gate cascade, and submits
//! at most one order per cooldown window.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::math::{divergence::DivergenceTracker, pricing, volatility::VolatilityState};
use crate::types::{
    ExecutionFailure, Market, OrderBookSnapshot, OrderRequest, OrderResult, PendingResolution,
    PriceTick, Side, Signal, TradeRecord,
};

use super::metrics::{ExecutionMetrics, TradeMetric};
use super::position::PositionManager;
use super::resolution::ResolutionTracker;
use super::strike::{StrikeService, StrikeSource};

const WARMUP_LOG_THROTTLE_MS: i64 = 30_000;
const WAITING_LOG_THROTTLE_MS: i64 = 5_000;
const LOCK_LOG_THROTTLE_MS: i64 = 1_000;
const STATE_LOG_THROTTLE_MS: i64 = 1_000;
const EXECUTION_TIMEOUT_S: u64 = 5;
const TICK_SIZE: f64 = 0.01;

/// External venue collaborator that executes an immediate-or-cancel buy.
/// Transport, auth, and wire format are out of scope here.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn submit_ioc(&self, order: OrderRequest) -> OrderResult;
}

struct Throttle {
    last_ms: i64,
}

impl Throttle {
    fn new() -> Self {
        Self { last_ms: i64::MIN }
    }

    fn ready(&mut self, now_ms: i64, interval_ms: i64) -> bool {
        if now_ms - self.last_ms >= interval_ms {
            self.last_ms = now_ms;
            true
        } else {
            false
        }
    }
}

pub struct ArbTrader {
    config: Config,
    volatility: VolatilityState,
    divergence: DivergenceTracker,
    strike: StrikeService,
    position: PositionManager,
    metrics: ExecutionMetrics,
    resolution: ResolutionTracker,

    market: Option<Market>,
    last_tick: Option<PriceTick>,
    last_book: Option<OrderBookSnapshot>,

    locked: bool,
    last_trade_ms: i64,
    startup_ms: i64,
    market_trades: Vec<TradeRecord>,

    warmup_throttle: Throttle,
    waiting_throttle: Throttle,
    lock_throttle: Throttle,
    state_throttle: Throttle,
}

impl ArbTrader {
    pub fn new(
        config: Config,
        volatility: VolatilityState,
        divergence: DivergenceTracker,
        startup_ms: i64,
    ) -> Self {
        let limits = super::position::PositionLimits {
            min_order: Decimal::from_f64(config.min_order_usd).unwrap_or(Decimal::ONE),
            max_order: Decimal::from_f64(config.max_order_usd).unwrap_or(Decimal::from(20)),
            max_position: Decimal::from_f64(config.max_position_usd).unwrap_or(Decimal::from(100)),
            max_total: Decimal::from_f64(config.max_total_usd).unwrap_or(Decimal::from(500)),
        };
        Self {
            config,
            volatility,
            divergence,
            strike: StrikeService::new(),
            position: PositionManager::new(limits),
            metrics: ExecutionMetrics::new(),
            resolution: ResolutionTracker::new(),
            market: None,
            last_tick: None,
            last_book: None,
            locked: false,
            last_trade_ms: i64::MIN,
            startup_ms,
            market_trades: Vec::new(),
            warmup_throttle: Throttle::new(),
            waiting_throttle: Throttle::new(),
            lock_throttle: Throttle::new(),
            state_throttle: Throttle::new(),
        }
    }

    pub fn set_market(&mut self, market: Market) {
        self.market = Some(market);
        if let Some(price) = self.market.as_ref().and_then(|m| m.strike) {
            self.strike.set_manual(price);
        }
    }

    pub fn resolution(&self) -> &ResolutionTracker {
        &self.resolution
    }

    pub fn divergence_tracker(&self) -> &DivergenceTracker {
        &self.divergence
    }

    pub fn divergence_tracker_mut(&mut self) -> &mut DivergenceTracker {
        &mut self.divergence
    }

    pub fn last_mid(&self) -> Option<f64> {
        self.last_tick.map(|t| t.mid())
    }

    pub fn refresh_volatility(
        &mut self,
        closes_1h: &[f64],
        closes_4h: &[f64],
        implied_30d: f64,
        short_implied: Option<f64>,
        now_ms: i64,
    ) {
        self.volatility.refresh(closes_1h, closes_4h, implied_30d, short_implied, now_ms);
    }

    pub async fn scan_resolutions(&mut self, now_ms: i64, source: &dyn super::resolution::ResolutionSource) {
        self.resolution.scan(now_ms, source).await;
    }

    pub fn metrics(&self) -> &ExecutionMetrics {
        &self.metrics
    }

    pub async fn on_price(
        &mut self,
        tick: PriceTick,
        now_ms: i64,
        strike_source: &dyn StrikeSource,
        sink: &dyn ExecutionSink,
    ) {
        self.last_tick = Some(tick);
        self.check_and_trade(now_ms, strike_source, sink).await;
    }

    pub async fn on_book(
        &mut self,
        book: OrderBookSnapshot,
        now_ms: i64,
        strike_source: &dyn StrikeSource,
        sink: &dyn ExecutionSink,
    ) {
        self.last_book = Some(book);
        self.check_and_trade(now_ms, strike_source, sink).await;
    }

    async fn check_and_trade(
        &mut self,
        now_ms: i64,
        strike_source: &dyn StrikeSource,
        sink: &dyn ExecutionSink,
    ) {
        let Some((signal, size)) = self.evaluate_gates(now_ms, strike_source).await else {
            return;
        };

        self.execute(signal, size, now_ms, sink).await;
    }

    /// Runs the ordered gate cascade and, if every gate passes, returns a
    /// sized signal ready for execute(). Short-circuits to None on the
    /// first failed gate.
    async fn evaluate_gates(
        &mut self,
        now_ms: i64,
        strike_source: &dyn StrikeSource,
    ) -> Option<(Signal, u64)> {
        let market = self.market.as_ref()?.clone();
        let tick = self.last_tick?;
        let book = self.last_book?;

        if now_ms - self.startup_ms < self.config.startup_cooldown_sec * 1000 {
            if self.warmup_throttle.ready(now_ms, WARMUP_LOG_THROTTLE_MS) {
                debug!("warmup active, suppressing signals");
            }
            return None;
        }

        if market.end_ms - now_ms <= self.config.stop_before_end_sec * 1000 {
            return None;
        }

        if !book.is_fresh(now_ms) {
            return None;
        }

        if !market.has_started(now_ms) {
            if self.waiting_throttle.ready(now_ms, WAITING_LOG_THROTTLE_MS) {
                let remaining = (market.start_ms - now_ms) / 1000;
                debug!(remaining_s = remaining, "waiting for market start");
            }
            return None;
        }

        if !self.strike.has_strike() {
            self.strike.fetch_and_set(&market.condition_id, strike_source).await;
            if !self.strike.has_strike() {
                return None;
            }
        }

        if self.locked {
            if self.lock_throttle.ready(now_ms, LOCK_LOG_THROTTLE_MS) {
                debug!("trade in progress, skipping tick");
            }
            return None;
        }

        if now_ms - self.last_trade_ms < self.config.trade_cooldown_ms {
            return None;
        }

        let horizon_min = (market.end_ms - now_ms) as f64 / 60_000.0;
        let sigma = self.volatility.blend_for_horizon(horizon_min);

        let adjustment = if self.divergence.has_reliable_data(now_ms) {
            self.divergence.ema_adjustment()
        } else {
            self.config.static_oracle_adjustment
        };
        let spot = tick.mid() + adjustment;
        let strike = self.strike.get_strike();
        let tau_seconds = (market.end_ms - now_ms) as f64 / 1000.0;

        let fair = pricing::fair(spot, strike, tau_seconds, sigma, true);
        let edge_up = pricing::edge(fair.p_up, book.yes_ask);
        let edge_down = pricing::edge(fair.p_down, book.no_ask);

        if self.state_throttle.ready(now_ms, STATE_LOG_THROTTLE_MS) {
            info!(
                ttl_s = tau_seconds,
                mid = tick.mid(),
                sigma,
                p_up = fair.p_up,
                p_down = fair.p_down,
                yes_ask = book.yes_ask,
                no_ask = book.no_ask,
                edge_up,
                edge_down,
                yes_shares = %self.position.yes_shares(),
                no_shares = %self.position.no_shares(),
                "trader state"
            );
        }

        self.select_signal(edge_up, edge_down, &book, fair.p_up, fair.p_down, now_ms)
    }

    /// UP-preferred, no fall-through: if UP qualifies but sizing fails,
    /// DOWN is never attempted on the same tick.
    fn select_signal(
        &mut self,
        edge_up: f64,
        edge_down: f64,
        book: &OrderBookSnapshot,
        p_up: f64,
        p_down: f64,
        now_ms: i64,
    ) -> Option<(Signal, u64)> {
        let up_qualifies = edge_up >= self.config.edge_minimum && book.yes_ask <= self.config.max_buy_price;
        if up_qualifies {
            let size = self.position.order_size(book.yes_ask);
            if size == 0 {
                return None;
            }
            return Some((
                Signal { side: Side::Up, edge: edge_up, fair_value: p_up, market_price: book.yes_ask, now_ms },
                size,
            ));
        }

        let down_qualifies = edge_down >= self.config.edge_minimum && book.no_ask <= self.config.max_buy_price;
        if down_qualifies {
            let size = self.position.order_size(book.no_ask);
            if size == 0 {
                return None;
            }
            return Some((
                Signal { side: Side::Down, edge: edge_down, fair_value: p_down, market_price: book.no_ask, now_ms },
                size,
            ));
        }

        None
    }

    async fn execute(&mut self, signal: Signal, size: u64, now_ms: i64, sink: &dyn ExecutionSink) {
        self.locked = true;
        let signal_time = signal.now_ms;
        let mid_at_signal = self.last_tick.map(|t| t.mid()).unwrap_or(signal.market_price);

        let price_with_slippage = price_with_slippage(signal.market_price, self.config.slippage_bps);

        let Some(market) = self.market.clone() else {
            self.locked = false;
            return;
        };

        if self.config.paper_trading {
            self.record_fill(signal, price_with_slippage, size as f64, signal_time, now_ms, mid_at_signal);
            self.locked = false;
            return;
        }

        let token_id = match signal.side {
            Side::Up => market.up_token_id.clone(),
            Side::Down => market.down_token_id.clone(),
        };
        let order = OrderRequest {
            token_id,
            price: Decimal::from_f64(price_with_slippage).unwrap_or(Decimal::ZERO),
            size: Decimal::from(size),
            side: signal.side,
            tick_size: market.tick_size,
            neg_risk: market.neg_risk,
        };

        let result = tokio::time::timeout(Duration::from_secs(EXECUTION_TIMEOUT_S), sink.submit_ioc(order)).await;

        match result {
            Ok(OrderResult::Filled { fill_price, fill_size, .. }) => {
                let fill_time = now_ms;
                self.record_fill(signal, fill_price, fill_size, signal_time, fill_time, mid_at_signal);
            }
            Ok(OrderResult::Rejected { reason }) => {
                warn!(reason = %reason, side = %signal.side, "order rejected");
                self.metrics.record_failure(&reason);
            }
            Err(_) => {
                warn!(side = %signal.side, "order submission timed out after 5s");
                self.metrics.record_failure(&ExecutionFailure::Timeout);
            }
        }

        self.locked = false;
    }

    fn record_fill(
        &mut self,
        signal: Signal,
        fill_price: f64,
        fill_size: f64,
        signal_time: i64,
        fill_time: i64,
        mid_at_signal: f64,
    ) {
        self.position.update(signal.side, fill_size as u64, fill_price);
        self.last_trade_ms = fill_time;

        let record = TradeRecord {
            side: signal.side,
            fill_price,
            size: fill_size,
            fair_value_at_signal: signal.fair_value,
            expected_edge: signal.edge,
            timestamp_ms: fill_time,
        };
        self.market_trades.push(record.clone());

        let mid_now = self.last_tick.map(|t| t.mid()).unwrap_or(mid_at_signal);
        let mid_move_pct = if mid_at_signal.abs() > f64::EPSILON {
            (mid_now - mid_at_signal) / mid_at_signal * 100.0
        } else {
            0.0
        };

        self.metrics.record(
            TradeMetric {
                latency_ms: fill_time - signal_time,
                slippage_cents: (fill_price - signal.market_price) * 100.0,
                expected_edge: signal.edge,
                realised_edge: signal.fair_value - fill_price,
                mid_move_pct,
            },
            fill_time,
        );
    }

    /// Clears per-market state, informing the resolution tracker first so
    /// trades accrued this market are not lost.
    pub fn reset_position(&mut self) {
        if let Some(market) = &self.market {
            if !self.market_trades.is_empty() {
                self.resolution.enqueue(PendingResolution {
                    condition_id: market.condition_id.clone(),
                    strike: self.strike.get_strike(),
                    end_ms: market.end_ms,
                    trades: std::mem::take(&mut self.market_trades),
                });
            }
        }
        self.position.reset_for_new_market();
        self.strike.reset();
        self.locked = false;
        self.last_trade_ms = i64::MIN;
    }

    pub fn should_stop(&self, now_ms: i64) -> bool {
        match &self.market {
            None => true,
            Some(market) => {
                market.end_ms - now_ms <= self.config.stop_before_end_sec * 1000
                    || self.position.total_usd_spent()
                        >= Decimal::from_f64(self.config.max_total_usd).unwrap_or(Decimal::MAX)
            }
        }
    }
}

fn price_with_slippage(ask: f64, slippage_bps: i64) -> f64 {
    let raw = ask * (1.0 + slippage_bps as f64 / 10_000.0);
    let rounded = (raw / TICK_SIZE).round() * TICK_SIZE;
    rounded.min(0.99)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::strike::StrikeSource;

    struct NeverSource;
    #[async_trait]
    impl StrikeSource for NeverSource {
        async fn fetch(&self, _condition_id: &str) -> Option<f64> {
            None
        }
    }

    struct PaperSink;
    #[async_trait]
    impl ExecutionSink for PaperSink {
        async fn submit_ioc(&self, _order: OrderRequest) -> OrderResult {
            OrderResult::Rejected { reason: ExecutionFailure::Other("not used in paper mode".into()) }
        }
    }

    struct RejectingSink;
    #[async_trait]
    impl ExecutionSink for RejectingSink {
        async fn submit_ioc(&self, _order: OrderRequest) -> OrderResult {
            OrderResult::Rejected { reason: ExecutionFailure::AuthBlocked }
        }
    }

    fn test_config() -> Config {
        Config {
            paper_trading: true,
            edge_minimum: 0.05,
            stop_before_end_sec: 30,
            startup_cooldown_sec: 60,
            trade_cooldown_ms: 5000,
            min_order_usd: 1.0,
            max_order_usd: 20.0,
            max_position_usd: 100.0,
            max_total_usd: 500.0,
            max_buy_price: 0.95,
            slippage_bps: 200,
            static_oracle_adjustment: 0.0,
            manual_strike: None,
            divergence_state_path: "state/divergence.json".to_string(),
            live_signer_key: None,
            live_funder_address: None,
            live_signature_type: 0,
        }
    }

    fn test_market(strike: Option<f64>) -> Market {
        Market {
            condition_id: "m1".into(),
            slug: "m1-slug".into(),
            up_token_id: "up".into(),
            down_token_id: "down".into(),
            start_ms: 0,
            end_ms: 900_000,
            tick_size: Decimal::new(1, 2),
            neg_risk: false,
            strike,
            settlement_source: "oracle".into(),
        }
    }

    /// Scenario: price_with_slippage with default params, ask 0.40 and
    /// slippage_bps 200.
    /// Expected: 0.40 * 1.02 = 0.408, rounded to 0.41.
    #[test]
    fn price_with_slippage_rounds_to_tick() {
        assert!((price_with_slippage(0.40, 200) - 0.41).abs() < 1e-9);
    }

    /// Scenario: slippage would push price above the 0.99 ceiling.
    /// Expected: clamped to 0.99.
    #[test]
    fn price_with_slippage_caps_at_ninety_nine_cents() {
        assert_eq!(price_with_slippage(0.98, 500), 0.99);
    }

    /// Scenario: still inside the startup warm-up window.
    /// Expected: no signal is produced regardless of edge.
    #[tokio::test]
    async fn warmup_gate_suppresses_signal() {
        let mut trader = ArbTrader::new(test_config(), VolatilityState::default(), DivergenceTracker::new(0.0), 0);
        trader.set_market(test_market(Some(100_000.0)));
        trader
            .on_price(PriceTick { bid: 104_000.0, ask: 104_010.0, timestamp_ms: 1_000 }, 1_000, &NeverSource, &PaperSink)
            .await;
        trader
            .on_book(
                OrderBookSnapshot {
                    yes_bid: 0.80, yes_ask: 0.82, yes_ask_size: 100.0,
                    no_bid: 0.16, no_ask: 0.18, no_ask_size: 100.0,
                    timestamp_ms: 1_000,
                },
                1_000,
                &NeverSource,
                &PaperSink,
            )
            .await;
        assert_eq!(trader.position.yes_shares(), Decimal::ZERO);
    }

    /// Scenario 1 from the end-to-end table, past warm-up: spot well above
    /// strike so UP edge clears the minimum and the ask is affordable.
    /// Expected: a paper fill records a nonzero YES position.
    #[tokio::test]
    async fn past_warmup_with_clear_edge_trades_in_paper_mode() {
        let mut cfg = test_config();
        cfg.startup_cooldown_sec = 0;
        let mut trader = ArbTrader::new(cfg, VolatilityState::default(), DivergenceTracker::new(0.0), 0);
        trader.set_market(test_market(Some(100_000.0)));

        let now = 100_000;
        trader
            .on_price(PriceTick { bid: 104_990.0, ask: 105_010.0, timestamp_ms: now }, now, &NeverSource, &PaperSink)
            .await;
        trader
            .on_book(
                OrderBookSnapshot {
                    yes_bid: 0.38, yes_ask: 0.40, yes_ask_size: 100.0,
                    no_bid: 0.58, no_ask: 0.60, no_ask_size: 100.0,
                    timestamp_ms: now,
                },
                now,
                &NeverSource,
                &PaperSink,
            )
            .await;

        assert!(trader.position.yes_shares() > Decimal::ZERO);
        assert_eq!(trader.metrics().record_count(), 1);
    }

    /// Scenario: a clear-edge live submission that the venue rejects.
    /// Expected: no fill is recorded, and the failure lands in the
    /// auth-blocked counter rather than only being logged.
    #[tokio::test]
    async fn rejected_live_order_increments_failure_counter() {
        let mut cfg = test_config();
        cfg.paper_trading = false;
        cfg.startup_cooldown_sec = 0;
        let mut trader = ArbTrader::new(cfg, VolatilityState::default(), DivergenceTracker::new(0.0), 0);
        trader.set_market(test_market(Some(100_000.0)));

        let now = 100_000;
        trader
            .on_price(PriceTick { bid: 104_990.0, ask: 105_010.0, timestamp_ms: now }, now, &NeverSource, &RejectingSink)
            .await;
        trader
            .on_book(
                OrderBookSnapshot {
                    yes_bid: 0.38, yes_ask: 0.40, yes_ask_size: 100.0,
                    no_bid: 0.58, no_ask: 0.60, no_ask_size: 100.0,
                    timestamp_ms: now,
                },
                now,
                &NeverSource,
                &RejectingSink,
            )
            .await;

        assert_eq!(trader.position.yes_shares(), Decimal::ZERO);
        assert_eq!(trader.metrics().record_count(), 0);
        assert_eq!(trader.metrics().failure_counts().auth_blocked, 1);
    }

    /// Scenario: end-of-life gate, market within stop_before_end_sec of
    /// expiry.
    /// Expected: no signal regardless of edge.
    #[tokio::test]
    async fn end_of_life_gate_suppresses_signal() {
        let mut cfg = test_config();
        cfg.startup_cooldown_sec = 0;
        let mut trader = ArbTrader::new(cfg, VolatilityState::default(), DivergenceTracker::new(0.0), 0);
        let mut market = test_market(Some(100_000.0));
        market.end_ms = 100_020_000;
        trader.set_market(market);

        let now = 100_000_000;
        trader.on_price(PriceTick { bid: 105_000.0, ask: 105_010.0, timestamp_ms: now }, now, &NeverSource, &PaperSink).await;
        trader
            .on_book(
                OrderBookSnapshot {
                    yes_bid: 0.38, yes_ask: 0.40, yes_ask_size: 100.0,
                    no_bid: 0.58, no_ask: 0.60, no_ask_size: 100.0,
                    timestamp_ms: now,
                },
                now,
                &NeverSource,
                &PaperSink,
            )
            .await;

        assert_eq!(trader.position.yes_shares(), Decimal::ZERO);
    }

    /// Scenario: market switch after a trade has been recorded.
    /// Expected: the trade is enqueued into the resolution tracker before
    /// the per-market position is cleared.
    #[tokio::test]
    async fn reset_position_enqueues_pending_resolution() {
        let mut cfg = test_config();
        cfg.startup_cooldown_sec = 0;
        let mut trader = ArbTrader::new(cfg, VolatilityState::default(), DivergenceTracker::new(0.0), 0);
        trader.set_market(test_market(Some(100_000.0)));

        let now = 100_000;
        trader.on_price(PriceTick { bid: 104_990.0, ask: 105_010.0, timestamp_ms: now }, now, &NeverSource, &PaperSink).await;
        trader
            .on_book(
                OrderBookSnapshot {
                    yes_bid: 0.38, yes_ask: 0.40, yes_ask_size: 100.0,
                    no_bid: 0.58, no_ask: 0.60, no_ask_size: 100.0,
                    timestamp_ms: now,
                },
                now,
                &NeverSource,
                &PaperSink,
            )
            .await;
        assert!(trader.position.yes_shares() > Decimal::ZERO);

        trader.reset_position();
        assert_eq!(trader.position.yes_shares(), Decimal::ZERO);
        assert_eq!(trader.resolution().pending_count(), 1);
    }

    /// Scenario: should_stop with no market set.
    /// Expected: true.
    #[test]
    fn should_stop_true_with_no_market() {
        let trader = ArbTrader::new(test_config(), VolatilityState::default(), DivergenceTracker::new(0.0), 0);
        assert!(trader.should_stop(0));
    }
}
