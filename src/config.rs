use crate::errors::ConfigError;

/// Immutable configuration loaded once at startup. Every field here
/// corresponds to a recognised option; there is no catch-all bag of
/// extra settings threaded through deep call sites.
#[derive(Clone, Debug)]
pub struct Config {
    pub paper_trading: bool,
    pub edge_minimum: f64,
    pub stop_before_end_sec: i64,
    pub startup_cooldown_sec: i64,
    pub trade_cooldown_ms: i64,

    pub min_order_usd: f64,
    pub max_order_usd: f64,
    pub max_position_usd: f64,
    pub max_total_usd: f64,

    pub max_buy_price: f64,
    pub slippage_bps: i64,
    pub static_oracle_adjustment: f64,
    pub manual_strike: Option<f64>,

    pub divergence_state_path: String,

    pub live_signer_key: Option<String>,
    pub live_funder_address: Option<String>,
    pub live_signature_type: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = Self {
            paper_trading: env_bool("PAPER_TRADING", true),
            edge_minimum: env_parse("EDGE_MINIMUM", 0.05)?,
            stop_before_end_sec: env_parse("STOP_BEFORE_END_SEC", 30)?,
            startup_cooldown_sec: env_parse("STARTUP_COOLDOWN_SEC", 60)?,
            trade_cooldown_ms: env_parse("TRADE_COOLDOWN_MS", 5000)?,

            min_order_usd: env_parse("MIN_ORDER_USD", 1.0)?,
            max_order_usd: env_parse("MAX_ORDER_USD", 20.0)?,
            max_position_usd: env_parse("MAX_POSITION_USD", 100.0)?,
            max_total_usd: env_parse("MAX_TOTAL_USD", 500.0)?,

            max_buy_price: env_parse("MAX_BUY_PRICE", 0.95)?,
            slippage_bps: env_parse("SLIPPAGE_BPS", 200)?,
            static_oracle_adjustment: env_parse("STATIC_ORACLE_ADJUSTMENT", 0.0)?,
            manual_strike: std::env::var("MANUAL_STRIKE").ok().and_then(|s| s.parse().ok()),

            divergence_state_path: std::env::var("DIVERGENCE_STATE_PATH")
                .unwrap_or_else(|_| "state/divergence.json".to_string()),

            live_signer_key: std::env::var("LIVE_SIGNER_KEY").ok(),
            live_funder_address: std::env::var("LIVE_FUNDER_ADDRESS").ok(),
            live_signature_type: env_parse("LIVE_SIGNATURE_TYPE", 0)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.01..1.0).contains(&self.edge_minimum) {
            return Err(ConfigError::EdgeMinimumOutOfRange(self.edge_minimum));
        }
        if !(self.max_buy_price > 0.0 && self.max_buy_price <= 0.99) {
            return Err(ConfigError::MaxBuyPriceOutOfRange(self.max_buy_price));
        }
        if !self.paper_trading && self.live_signer_key.is_none() {
            return Err(ConfigError::MissingLiveCredential("LIVE_SIGNER_KEY"));
        }
        Ok(())
    }
}

fn env_bool(key: &'static str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        Err(_) => Ok(default),
    }
}
