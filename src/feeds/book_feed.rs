//! Reconnecting WebSocket producer for a market's top-of-book snapshot.
//! Each event replaces the previous snapshot wholesale — there is no
//! incremental diffing. Re-subscribes with fresh token ids on every
//! reconnect, which also doubles as the mechanism for switching markets:
//! callers drop and recreate this task's channel when the active market
//! changes.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::types::OrderBookSnapshot;

const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 10_000;
const PING_INTERVAL_S: u64 = 10;

pub async fn run(
    tx: mpsc::Sender<OrderBookSnapshot>,
    ws_url: String,
    up_token_id: String,
    down_token_id: String,
) {
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        info!(url = %ws_url, "connecting to order book feed");

        let ws = match connect_async(&ws_url).await {
            Ok((ws, _)) => {
                backoff_ms = INITIAL_BACKOFF_MS;
                ws
            }
            Err(e) => {
                warn!(error = %e, backoff_ms, "order book feed connect failed, retrying");
                tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                continue;
            }
        };

        let (mut write, mut read) = ws.split();

        let subscribe = serde_json::json!({
            "assets_ids": [&up_token_id, &down_token_id],
            "type": "market",
        });
        if let Err(e) = write.send(Message::Text(subscribe.to_string())).await {
            warn!(error = %e, "order book feed subscribe failed, reconnecting");
            continue;
        }

        let mut ping_interval = tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_S));

        loop {
            tokio::select! {
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            warn!(error = %e, "order book feed websocket error, reconnecting");
                            break;
                        }
                        None => {
                            warn!("order book feed stream ended, reconnecting");
                            break;
                        }
                    };

                    if let Message::Text(text) = msg {
                        if let Some(snapshot) = parse_snapshot(&text, &up_token_id, &down_token_id) {
                            if tx.send(snapshot).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                _ = ping_interval.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        warn!(backoff_ms, "order book feed disconnected, reconnecting");
        tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}

/// Parses a best-bid-ask event array, pulling out whichever side(s) the
/// payload carries for the two tracked token ids. Missing fields for one
/// side do not invalidate the other.
fn parse_snapshot(text: &str, up_token_id: &str, down_token_id: &str) -> Option<OrderBookSnapshot> {
    let v: serde_json::Value = serde_json::from_str(text).ok()?;
    let events: Vec<serde_json::Value> = if v.is_array() {
        v.as_array()?.clone()
    } else if v.is_object() {
        vec![v]
    } else {
        return None;
    };

    let mut yes_bid = None;
    let mut yes_ask = None;
    let mut yes_ask_size = None;
    let mut no_bid = None;
    let mut no_ask = None;
    let mut no_ask_size = None;
    let mut timestamp_ms = chrono::Utc::now().timestamp_millis();
    let mut found = false;

    for event in &events {
        let event_type = event.get("event_type").and_then(|e| e.as_str()).unwrap_or("");
        if event_type != "best_bid_ask" && event_type != "price_change" && event_type != "book" {
            continue;
        }

        let asset_id = event.get("asset_id").and_then(|a| a.as_str()).unwrap_or("");
        let bid = parse_numeric_field(event, "best_bid");
        let ask = parse_numeric_field(event, "best_ask");
        let ask_size = parse_numeric_field(event, "best_ask_size");

        if let Some(t) = event.get("timestamp").and_then(|t| t.as_i64()) {
            timestamp_ms = t;
        }

        if asset_id == up_token_id {
            yes_bid = bid.or(yes_bid);
            yes_ask = ask.or(yes_ask);
            yes_ask_size = ask_size.or(yes_ask_size);
            found = true;
        } else if asset_id == down_token_id {
            no_bid = bid.or(no_bid);
            no_ask = ask.or(no_ask);
            no_ask_size = ask_size.or(no_ask_size);
            found = true;
        }
    }

    if !found {
        return None;
    }

    Some(OrderBookSnapshot {
        yes_bid: yes_bid?,
        yes_ask: yes_ask?,
        yes_ask_size: yes_ask_size.unwrap_or(0.0),
        no_bid: no_bid?,
        no_ask: no_ask?,
        no_ask_size: no_ask_size.unwrap_or(0.0),
        timestamp_ms,
    })
}

fn parse_numeric_field(event: &serde_json::Value, key: &str) -> Option<f64> {
    let field = event.get(key)?;
    field.as_f64().or_else(|| field.as_str().and_then(|s| s.parse().ok()))
}
