// Venue API module
pub mod rest;
pub mod sign;
pub mod stream;

pub use rest::{BinanceClient, Credentials, OrderAck, Ticker24h, VenuePosition};
pub use stream::{connect_kline_stream, parse_kline_message, KlineUpdate};

use thiserror::Error;

/// Everything that can go wrong talking to the venue
///
/// The split that matters downstream: `RateLimited` is retried with
/// backoff, `Rejected` never is (blind retries risk duplicate fills).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("venue rate limit hit")]
    RateLimited,

    #[error("venue rejected the request (code {code}): {msg}")]
    Rejected { code: i64, msg: String },

    #[error("order notional {notional:.2} below venue minimum {min:.2}")]
    OrderTooSmall { notional: f64, min: f64 },

    #[error("an order for this instrument is already in flight")]
    InFlight,

    #[error("no trading rules published for {0}")]
    MissingRules(String),

    #[error("credentials required for signed endpoint")]
    MissingCredentials,

    #[error("failed to sign request: {0}")]
    Signing(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    Stream(String),

    #[error("malformed venue response: {0}")]
    Malformed(String),
}

impl ApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited)
    }
}
