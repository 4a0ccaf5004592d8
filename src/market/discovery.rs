//! Periodic listing of active 15-minute markets. This is an external
//! collaborator by contract — the trading engine only ever asks for
//! "the next market" through [`MarketDiscovery`]; everything below the
//! trait is one concrete Gamma-API-backed implementation of it.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::types::Market;

#[async_trait]
pub trait MarketDiscovery: Send + Sync {
    async fn discover_next(&self) -> Result<Market, String>;
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub gamma_api_url: String,
    pub series_id: String,
    pub slug_prefix: String,
    pub window_secs: i64,
}

pub struct GammaDiscovery {
    client: reqwest::Client,
    config: DiscoveryConfig,
}

impl GammaDiscovery {
    pub fn new(client: reqwest::Client, config: DiscoveryConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl MarketDiscovery for GammaDiscovery {
    /// Tries the current and next slug-derived window first (cheap,
    /// exact match), then falls back to a series-id listing for venues
    /// that use human-readable slugs outside that convention.
    async fn discover_next(&self) -> Result<Market, String> {
        let now_s = chrono::Utc::now().timestamp();
        let ws = self.config.window_secs;
        let current_window_start = (now_s / ws) * ws;
        let next_window_start = current_window_start + ws;

        for window_start in [current_window_start, next_window_start] {
            let slug = format!("{}{}", self.config.slug_prefix, window_start);
            match self.fetch_by_slug(&slug).await {
                Ok(Some(market)) => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    if market.end_ms < now_ms {
                        continue;
                    }
                    info!(slug = %market.slug, "discovered market");
                    return Ok(market);
                }
                Ok(None) => {}
                Err(e) => warn!(slug = %slug, error = %e, "discovery lookup failed"),
            }
        }

        self.discover_via_series().await
    }
}

impl GammaDiscovery {
    async fn fetch_by_slug(&self, slug: &str) -> Result<Option<Market>, String> {
        let url = format!("{}/events?slug={}", self.config.gamma_api_url, slug);
        let text = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("http error: {e}"))?
            .text()
            .await
            .map_err(|e| format!("body error: {e}"))?;

        let events: serde_json::Value = serde_json::from_str(&text).map_err(|e| format!("json error: {e}"))?;
        let events = match events.as_array() {
            Some(a) if !a.is_empty() => a,
            _ => return Ok(None),
        };

        parse_event(&events[0], slug, self.config.window_secs * 1000)
    }

    async fn discover_via_series(&self) -> Result<Market, String> {
        let url = format!(
            "{}/events?series_id={}&active=true&closed=false&limit=100&order=endDate&ascending=false",
            self.config.gamma_api_url, self.config.series_id,
        );
        let text = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("http error: {e}"))?
            .text()
            .await
            .map_err(|e| format!("body error: {e}"))?;

        let events: serde_json::Value = serde_json::from_str(&text).map_err(|e| format!("json error: {e}"))?;
        let events = events.as_array().ok_or("expected array of events")?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let window_ms = self.config.window_secs * 1000;
        let mut best: Option<Market> = None;
        let mut best_start = i64::MAX;

        for event in events {
            let slug = event.get("slug").and_then(|s| s.as_str()).unwrap_or("");
            if let Ok(Some(market)) = parse_event(event, slug, window_ms) {
                if market.end_ms >= now_ms && market.start_ms < best_start {
                    best_start = market.start_ms;
                    best = Some(market);
                }
            }
        }

        best.ok_or_else(|| format!("no active market found for series {}", self.config.series_id))
    }
}

fn parse_event(event: &serde_json::Value, slug: &str, window_ms: i64) -> Result<Option<Market>, String> {
    let Some(markets) = event.get("markets").and_then(|m| m.as_array()).filter(|m| !m.is_empty()) else {
        return Ok(None);
    };

    let end_date = event.get("endDate").and_then(|s| s.as_str()).unwrap_or("");
    let end_ms = parse_datetime_ms(end_date).unwrap_or(0);

    let start_ms = slug
        .rsplit('-')
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .map(|ts| if ts > 1_000_000_000_000 { ts } else { ts * 1000 })
        .filter(|&ts| ts > 0)
        .unwrap_or_else(|| if end_ms > 0 { end_ms - window_ms } else { 0 });

    if start_ms == 0 || end_ms == 0 {
        return Ok(None);
    }

    let (up_token_id, down_token_id) = extract_token_ids(markets);
    if up_token_id.is_empty() || down_token_id.is_empty() {
        return Ok(None);
    }

    let condition_id = markets[0].get("conditionId").and_then(|c| c.as_str()).unwrap_or(slug).to_string();

    Ok(Some(Market {
        condition_id,
        slug: slug.to_string(),
        up_token_id,
        down_token_id,
        start_ms,
        end_ms,
        tick_size: Decimal::new(1, 2),
        neg_risk: markets[0].get("negRisk").and_then(|n| n.as_bool()).unwrap_or(false),
        strike: None,
        settlement_source: "oracle".to_string(),
    }))
}

/// Classifies a free-text outcome label as the UP or DOWN side of a
/// binary market, or `None` if it matches neither vocabulary.
fn classify_label(label: &str) -> Option<bool> {
    const UP_WORDS: [&str; 3] = ["up", "yes", "higher"];
    const DOWN_WORDS: [&str; 3] = ["down", "no", "lower"];
    let lower = label.to_lowercase();
    if UP_WORDS.iter().any(|w| lower.contains(w)) {
        Some(true)
    } else if DOWN_WORDS.iter().any(|w| lower.contains(w)) {
        Some(false)
    } else {
        None
    }
}

fn json_string_array(value: &serde_json::Value, field: &str) -> Vec<String> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

/// Pulls UP/DOWN token ids out of a Gamma `markets` array. Venues expose
/// this two different ways: one object per outcome carrying a single
/// `clobTokenIds`, or one object carrying both outcomes as parallel
/// `outcomes`/`clobTokenIds` JSON-array strings. Both are tried in turn,
/// against the same label classifier, so a market that only partially
/// matches the first shape still resolves via the second.
fn extract_token_ids(markets: &[serde_json::Value]) -> (String, String) {
    let mut labelled: Vec<(String, String)> = Vec::new();

    if markets.len() == 2 {
        labelled.extend(markets.iter().map(|market| {
            let label = market
                .get("groupItemTitle")
                .or_else(|| market.get("outcome"))
                .and_then(|o| o.as_str())
                .unwrap_or("")
                .to_string();
            (label, first_token_id(market))
        }));
    }

    if labelled.iter().filter(|(l, _)| classify_label(l).is_some()).count() < 2 {
        for market in markets {
            let outcomes = json_string_array(market, "outcomes");
            let tokens = json_string_array(market, "clobTokenIds");
            labelled.extend(outcomes.into_iter().zip(tokens));
        }
    }

    let mut up = String::new();
    let mut down = String::new();
    for (label, token) in labelled {
        match classify_label(&label) {
            Some(true) => up = token,
            Some(false) => down = token,
            None => {}
        }
    }
    (up, down)
}

fn first_token_id(market: &serde_json::Value) -> String {
    match market.get("clobTokenIds") {
        Some(raw) => {
            if let Some(s) = raw.as_str() {
                if s.starts_with('[') {
                    return serde_json::from_str::<Vec<String>>(s)
                        .ok()
                        .and_then(|v| v.into_iter().next())
                        .unwrap_or_default();
                }
                return s.to_string();
            }
            raw.as_array()
                .and_then(|a| a.first())
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        }
        None => String::new(),
    }
}

/// Parses an event timestamp in whichever of the three shapes the Gamma
/// API happens to send: RFC3339, a naive datetime with optional fractional
/// seconds, or a raw epoch number in either seconds or milliseconds.
fn parse_datetime_ms(s: &str) -> Option<i64> {
    let from_rfc3339 = || chrono::DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp_millis());
    let from_naive = || {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
            .ok()
            .map(|dt| dt.and_utc().timestamp_millis())
    };
    let from_epoch = || {
        s.parse::<i64>().ok().map(|ts| if ts > 1_000_000_000_000 { ts } else { ts * 1000 })
    };

    from_rfc3339().or_else(from_naive).or_else(from_epoch)
}
