//! Reconnecting WebSocket producer for the reference-exchange mid-price
//! stream. Owns no shared state beyond its channel sender so it can run
//! across market boundaries without restarting.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::types::PriceTick;

const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 10_000;

/// Connects to `ws_url`, falling back to `ws_fallback` on a failed primary
/// connection attempt, and forwards parsed ticks on `tx` until the
/// receiver is dropped.
pub async fn run(tx: mpsc::Sender<PriceTick>, ws_url: String, ws_fallback: String) {
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        info!(url = %ws_url, "connecting to reference price feed");

        let ws = match connect_async(&ws_url).await {
            Ok((ws, _)) => {
                backoff_ms = INITIAL_BACKOFF_MS;
                ws
            }
            Err(primary_err) => match connect_async(&ws_fallback).await {
                Ok((ws, _)) => {
                    info!("connected via fallback endpoint");
                    backoff_ms = INITIAL_BACKOFF_MS;
                    ws
                }
                Err(fallback_err) => {
                    warn!(%primary_err, %fallback_err, backoff_ms, "price feed connect failed, retrying");
                    tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                    continue;
                }
            },
        };

        let (_write, mut read) = ws.split();

        while let Some(msg) = read.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "price feed websocket error, reconnecting");
                    break;
                }
            };

            if let Message::Text(text) = msg {
                if let Some(tick) = parse_tick(&text) {
                    if tx.send(tick).await.is_err() {
                        return;
                    }
                }
            }
        }

        warn!(backoff_ms, "price feed disconnected, reconnecting");
        tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}

fn parse_tick(text: &str) -> Option<PriceTick> {
    let v: serde_json::Value = serde_json::from_str(text).ok()?;
    let bid: f64 = v["b"].as_str()?.parse().ok()?;
    let ask: f64 = v["a"].as_str()?.parse().ok()?;
    let timestamp_ms = v["T"].as_i64().unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    Some(PriceTick { bid, ask, timestamp_ms })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: a well-formed book-ticker style payload.
    /// Expected: bid/ask parse and mid is their average.
    #[test]
    fn parses_valid_ticker_payload() {
        let payload = r#"{"b":"104990.10","a":"105010.20","T":1700000000000}"#;
        let tick = parse_tick(payload).unwrap();
        assert!((tick.mid() - 105000.15).abs() < 1e-6);
    }

    /// Scenario: payload missing the expected fields.
    /// Expected: None, not a panic.
    #[test]
    fn missing_fields_returns_none() {
        assert!(parse_tick(r#"{"unexpected":true}"#).is_none());
    }

    /// Scenario: malformed JSON.
    /// Expected: None.
    #[test]
    fn invalid_json_returns_none() {
        assert!(parse_tick("not json").is_none());
    }
}
