use thiserror::Error;

/// Fatal-at-startup configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("edge_minimum must be in [0.01, 1.0), got {0}")]
    EdgeMinimumOutOfRange(f64),
    #[error("max_buy_price must be in (0, 0.99], got {0}")]
    MaxBuyPriceOutOfRange(f64),
    #[error("live trading requires {0}, but it was not set")]
    MissingLiveCredential(&'static str),
    #[error("environment variable {0} could not be parsed: {1}")]
    InvalidValue(&'static str, String),
}

/// Errors surfaced by the divergence-tracker persistence layer. Every
/// variant here is handled as non-fatal by the caller: a failed load is
/// treated the same as no saved state, a failed save is logged and
/// swallowed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("state file io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file is not valid json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("state file is older than the {max_age_s}s freshness window")]
    Stale { max_age_s: i64 },
}
