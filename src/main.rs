mod config;
mod engine;
mod errors;
mod feeds;
mod gateway;
mod market;
mod math;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use config::Config;
use engine::resolution::ResolutionSource;
use engine::strike::StrikeSource;
use engine::trader::{ArbTrader, ExecutionSink};
use market::discovery::{DiscoveryConfig, GammaDiscovery, MarketDiscovery};
use math::divergence::DivergenceTracker;
use math::volatility::VolatilityState;
use types::{Market, Outcome, OrderBookSnapshot, OrderRequest, OrderResult, PriceTick};

const VOLATILITY_REFRESH_INTERVAL_S: u64 = 120;
const DIVERGENCE_POLL_INTERVAL_S: u64 = 60;
const RESOLUTION_SCAN_INTERVAL_S: u64 = 30;
const DISCOVERY_RETRY_S: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!(paper_trading = config.paper_trading, "starting trading engine");

    let http = reqwest::Client::new();

    let mut divergence = DivergenceTracker::new(config.static_oracle_adjustment);
    let divergence_path = PathBuf::from(&config.divergence_state_path);
    divergence.load_from(&divergence_path, chrono::Utc::now().timestamp_millis());

    let discovery = GammaDiscovery::new(
        http.clone(),
        DiscoveryConfig {
            gamma_api_url: std::env::var("GAMMA_API_URL").unwrap_or_else(|_| "https://gamma-api.polymarket.com".into()),
            series_id: std::env::var("SERIES_ID").unwrap_or_default(),
            slug_prefix: std::env::var("SLUG_PREFIX").unwrap_or_else(|_| "btc-updown-15m-".into()),
            window_secs: 900,
        },
    );

    let strike_source = BinanceCandleSource { client: http.clone() };
    let resolution_source = GammaResolutionSource { client: http.clone(), gamma_api_url: std::env::var("GAMMA_API_URL").unwrap_or_else(|_| "https://gamma-api.polymarket.com".into()) };

    let sink: Arc<dyn ExecutionSink> = if config.paper_trading {
        Arc::new(NullExecutionSink)
    } else {
        let signer = config.live_signer_key.clone().expect("validated at config load");
        let clob_url = std::env::var("CLOB_URL").unwrap_or_else(|_| "https://clob.polymarket.com".into());
        Arc::new(
            gateway::execution::LiveExecutionSink::connect(
                &clob_url,
                &signer,
                config.live_signature_type,
                config.live_funder_address.as_deref(),
            )
            .await?,
        )
    };

    // The reference-exchange price feed is persistent across market
    // boundaries: it keeps a single reconnecting websocket alive for the
    // life of the process, and every tick is simply offered to whichever
    // trader is active. Ticks received with no active market are dropped
    // by the readiness gate, not by this feed.
    let (price_tx, mut price_rx) = mpsc::channel::<PriceTick>(4096);
    let price_ws_url = std::env::var("PRICE_WS_URL").unwrap_or_else(|_| "wss://stream.binance.com:9443/ws/btcusdt@bookTicker".into());
    let price_ws_fallback = std::env::var("PRICE_WS_FALLBACK_URL").unwrap_or_else(|_| price_ws_url.clone());
    tokio::spawn(feeds::price_feed::run(price_tx, price_ws_url, price_ws_fallback));

    let mut volatility = VolatilityState::default();
    let implied_30d = std::env::var("IMPLIED_VOL_30D").ok().and_then(|v| v.parse().ok()).unwrap_or(0.50);
    volatility.implied_30d = implied_30d;

    let startup_ms = chrono::Utc::now().timestamp_millis();
    let mut trader = ArbTrader::new(config.clone(), volatility, divergence, startup_ms);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    loop {
        let mut discovery_shutdown = shutdown_rx.clone();
        let market = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut discovery_shutdown) => {
                tracing::info!("shutdown requested during discovery");
                break;
            }
            market = discover_until_found(&discovery) => market,
        };

        let mut market = market;
        if market.strike.is_none() {
            market.strike = strike_source.fetch(&market.condition_id).await;
        }
        tracing::info!(slug = %market.slug, "next market armed");
        trader.set_market(market.clone());

        let (book_tx, book_rx) = mpsc::channel::<OrderBookSnapshot>(4096);
        let book_handle = tokio::spawn(feeds::book_feed::run(
            book_tx,
            std::env::var("BOOK_WS_URL").unwrap_or_else(|_| "wss://ws-subscriptions-clob.polymarket.com/ws/market".into()),
            market.up_token_id.clone(),
            market.down_token_id.clone(),
        ));

        let stopped_for_shutdown = run_market(
            &mut trader,
            &market,
            &mut price_rx,
            book_rx,
            &strike_source,
            &resolution_source,
            sink.as_ref(),
            shutdown_rx.clone(),
        )
        .await;

        book_handle.abort();
        trader.reset_position();

        if stopped_for_shutdown {
            break;
        }
        tracing::info!(slug = %market.slug, "market cycle complete");
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    if let Err(e) = trader.divergence_tracker().save_to(&divergence_path, now_ms) {
        tracing::warn!(error = %e, "failed to persist divergence state on shutdown");
    }

    Ok(())
}

async fn discover_until_found(discovery: &impl MarketDiscovery) -> Market {
    loop {
        match discovery.discover_next().await {
            Ok(m) => return m,
            Err(e) => {
                tracing::warn!(error = %e, "market discovery failed, retrying");
                tokio::time::sleep(tokio::time::Duration::from_secs(DISCOVERY_RETRY_S)).await;
            }
        }
    }
}

/// Resolves once the shutdown watch channel is set, and immediately if
/// it is already set when first polled.
async fn wait_for_shutdown(rx: &mut tokio::sync::watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
}

/// Runs one market's event loop to completion (should_stop or shutdown).
/// Returns true if the process should exit entirely.
async fn run_market(
    trader: &mut ArbTrader,
    market: &Market,
    price_rx: &mut mpsc::Receiver<PriceTick>,
    mut book_rx: mpsc::Receiver<OrderBookSnapshot>,
    strike_source: &dyn StrikeSource,
    resolution_source: &dyn ResolutionSource,
    sink: &dyn ExecutionSink,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> bool {
    let mut vol_timer = tokio::time::interval(tokio::time::Duration::from_secs(VOLATILITY_REFRESH_INTERVAL_S));
    let mut div_timer = tokio::time::interval(tokio::time::Duration::from_secs(DIVERGENCE_POLL_INTERVAL_S));
    let mut res_timer = tokio::time::interval(tokio::time::Duration::from_secs(RESOLUTION_SCAN_INTERVAL_S));

    loop {
        let now_ms = chrono::Utc::now().timestamp_millis();
        if trader.should_stop(now_ms) {
            return false;
        }

        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                tracing::info!(slug = %market.slug, "shutdown requested mid-market");
                return true;
            }
            Some(tick) = price_rx.recv() => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                trader.on_price(tick, now_ms, strike_source, sink).await;
            }
            Some(book) = book_rx.recv() => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                trader.on_book(book, now_ms, strike_source, sink).await;
            }
            _ = vol_timer.tick() => {
                // The historical-closes fetcher that would feed realised
                // windows here is an external collaborator out of scope;
                // ticking this timer keeps the refresh cadence visible
                // without fabricating close data.
                tracing::debug!("volatility refresh tick (no historical source configured)");
            }
            _ = div_timer.tick() => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                if let (Some(exchange), Some(oracle)) = (trader.last_mid(), strike_source.fetch(&market.condition_id).await) {
                    trader.divergence_tracker_mut().observe(now_ms, exchange, oracle);
                }
            }
            _ = res_timer.tick() => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                trader.scan_resolutions(now_ms, resolution_source).await;
            }
        }
    }
}

/// Fetches the market's reference candle open via REST, the same value
/// used both as the strike and as a divergence sample against the oracle.
struct BinanceCandleSource {
    client: reqwest::Client,
}

#[async_trait]
impl StrikeSource for BinanceCandleSource {
    async fn fetch(&self, _condition_id: &str) -> Option<f64> {
        let symbol = std::env::var("REFERENCE_SYMBOL").unwrap_or_else(|_| "BTCUSDT".into());
        let url = format!("https://api.binance.com/api/v3/ticker/price?symbol={symbol}");
        let resp = self.client.get(&url).send().await.ok()?;
        let text = resp.text().await.ok()?;
        let v: serde_json::Value = serde_json::from_str(&text).ok()?;
        v["price"].as_str()?.parse().ok()
    }
}

struct GammaResolutionSource {
    client: reqwest::Client,
    gamma_api_url: String,
}

#[async_trait]
impl ResolutionSource for GammaResolutionSource {
    async fn outcome(&self, condition_id: &str) -> Outcome {
        let url = format!("{}/markets/{}", self.gamma_api_url, condition_id);
        let Ok(resp) = self.client.get(&url).send().await else {
            return Outcome::Unresolved;
        };
        let Ok(text) = resp.text().await else {
            return Outcome::Unresolved;
        };
        let Ok(v) = serde_json::from_str::<serde_json::Value>(&text) else {
            return Outcome::Unresolved;
        };

        match v.get("outcome").and_then(|o| o.as_str()) {
            Some(s) if s.eq_ignore_ascii_case("up") || s == "1" => Outcome::Up,
            Some(s) if s.eq_ignore_ascii_case("down") || s == "0" => Outcome::Down,
            _ => Outcome::Unresolved,
        }
    }
}

struct NullExecutionSink;

#[async_trait]
impl ExecutionSink for NullExecutionSink {
    async fn submit_ioc(&self, _order: OrderRequest) -> OrderResult {
        OrderResult::Rejected { reason: types::ExecutionFailure::Other("execution sink not configured for paper mode".into()) }
    }
}
