//! Per-market position/cost-basis accounting, session-wide exposure caps,
//! and USD-based order sizing with latched breach logging.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use tracing::warn;

use crate::types::Side;

/// The four USD limits the position manager enforces.
#[derive(Debug, Clone, Copy)]
pub struct PositionLimits {
    pub min_order: Decimal,
    pub max_order: Decimal,
    pub max_position: Decimal,
    pub max_total: Decimal,
}

pub struct PositionManager {
    limits: PositionLimits,

    yes_shares: Decimal,
    no_shares: Decimal,
    yes_cost: Decimal,
    no_cost: Decimal,

    total_usd_spent: Decimal,
    market_trade_count: u64,

    session_cap_latched: bool,
    market_cap_latched: bool,
}

impl PositionManager {
    pub fn new(limits: PositionLimits) -> Self {
        Self {
            limits,
            yes_shares: Decimal::ZERO,
            no_shares: Decimal::ZERO,
            yes_cost: Decimal::ZERO,
            no_cost: Decimal::ZERO,
            total_usd_spent: Decimal::ZERO,
            market_trade_count: 0,
            session_cap_latched: false,
            market_cap_latched: false,
        }
    }

    pub fn yes_shares(&self) -> Decimal {
        self.yes_shares
    }

    pub fn no_shares(&self) -> Decimal {
        self.no_shares
    }

    pub fn total_usd_spent(&self) -> Decimal {
        self.total_usd_spent
    }

    /// Maximum integer number of shares to buy at `price` such that every
    /// cap holds. Returns 0 when no admissible size exists.
    pub fn order_size(&mut self, price: f64) -> u64 {
        let price = match Decimal::from_f64(price) {
            Some(p) if p > Decimal::ZERO => p,
            _ => return 0,
        };

        // 1. Session cap.
        let session_remaining = self.limits.max_total - self.total_usd_spent;
        if session_remaining < self.limits.min_order {
            if !self.session_cap_latched {
                warn!(remaining = %session_remaining, "session exposure cap reached");
                self.session_cap_latched = true;
            }
            return 0;
        }
        let max_shares_session = (session_remaining / price).floor();

        // 2. Per-market cap.
        let market_notional = (self.yes_shares + self.no_shares) * price;
        let market_remaining = self.limits.max_position - market_notional;
        if market_remaining < self.limits.min_order {
            if !self.market_cap_latched {
                warn!(remaining = %market_remaining, "per-market exposure cap reached");
                self.market_cap_latched = true;
            }
            return 0;
        }
        let max_shares_market = (market_remaining / price).floor();

        // 3. Per-order cap.
        let max_shares_order = (self.limits.max_order / price).floor();

        let mut shares = max_shares_session.min(max_shares_market).min(max_shares_order);

        // 4. Floor bump: if the derived size rounds below the minimum
        // order notional, either bump up to the minimum or reject.
        let min_shares = (self.limits.min_order / price).ceil();
        if shares < min_shares {
            let min_notional = min_shares * price;
            if min_notional <= session_remaining && min_notional <= market_remaining {
                shares = min_shares;
            } else {
                return 0;
            }
        }

        shares.to_u64().unwrap_or(0)
    }

    pub fn update(&mut self, side: Side, shares: u64, price: f64) {
        let shares_d = Decimal::from(shares);
        let price_d = Decimal::from_f64(price).unwrap_or(Decimal::ZERO);
        let cost = shares_d * price_d;

        match side {
            Side::Up => {
                self.yes_shares += shares_d;
                self.yes_cost += cost;
            }
            Side::Down => {
                self.no_shares += shares_d;
                self.no_cost += cost;
            }
        }
        self.total_usd_spent += cost;
        self.market_trade_count += 1;
    }

    /// Mark-to-market P&L, treating fully paired holdings as locked
    /// profit at their settlement value of exactly 1 per pair.
    pub fn pnl(&self, yes_bid: f64, no_bid: f64) -> Decimal {
        let yes_bid = Decimal::from_f64(yes_bid).unwrap_or(Decimal::ZERO);
        let no_bid = Decimal::from_f64(no_bid).unwrap_or(Decimal::ZERO);

        let pairs = self.yes_shares.min(self.no_shares);
        if pairs <= Decimal::ZERO {
            return self.yes_shares * yes_bid + self.no_shares * no_bid
                - (self.yes_cost + self.no_cost);
        }

        let yes_avg_cost = self.yes_cost / self.yes_shares;
        let no_avg_cost = self.no_cost / self.no_shares;

        let pair_cost = pairs * (yes_avg_cost + no_avg_cost);
        let pair_value = pairs * Decimal::ONE;
        let locked_pnl = pair_value - pair_cost;

        let unpaired_yes = self.yes_shares - pairs;
        let unpaired_no = self.no_shares - pairs;
        let unpaired_mtm = unpaired_yes * yes_bid + unpaired_no * no_bid
            - unpaired_yes * yes_avg_cost
            - unpaired_no * no_avg_cost;

        locked_pnl + unpaired_mtm
    }

    /// Clears per-market position and the per-market latch. Session
    /// totals and the session latch are untouched.
    pub fn reset_for_new_market(&mut self) {
        self.yes_shares = Decimal::ZERO;
        self.no_shares = Decimal::ZERO;
        self.yes_cost = Decimal::ZERO;
        self.no_cost = Decimal::ZERO;
        self.market_trade_count = 0;
        self.market_cap_latched = false;
    }
}
