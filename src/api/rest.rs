use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use governor::{Quota, RateLimiter};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::sign::sign_query;
use crate::api::ApiError;
use crate::models::{Candle, Side, TradingRules};

const RECV_WINDOW_MS: u64 = 10_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
// Stays well under the venue's published request weight budget
const REQUESTS_PER_MINUTE: u32 = 600;

// Type alias for the rate limiter to simplify signatures
type VenueRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// API key pair for signed endpoints
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Futures REST client
///
/// Cloneable; all clones share one HTTP connection pool and one rate
/// limiter, so a burst from one instrument's call chain delays only the
/// callers waiting on the limiter, never a lock.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Option<Arc<Credentials>>,
    rate_limiter: Arc<VenueRateLimiter>,
}

/// Order confirmation returned by the venue
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: u64,
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
}

/// One position reported by the account endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct VenuePosition {
    pub symbol: String,
    pub entry_price: f64,
    /// Signed quantity: negative means short
    pub position_amt: f64,
}

/// 24-hour rolling ticker entry, the market-scan input
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker24h {
    pub symbol: String,
    pub last_price: f64,
    pub quote_volume: f64,
}

// ============== Wire types ==============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTime {
    server_time: u64,
}

#[derive(Deserialize)]
struct PriceTicker {
    price: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker24h {
    symbol: String,
    last_price: String,
    quote_volume: String,
}

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<SymbolFilter>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolFilter {
    filter_type: String,
    #[serde(default)]
    step_size: Option<String>,
    #[serde(default)]
    notional: Option<String>,
    #[serde(default)]
    min_notional: Option<String>,
}

#[derive(Deserialize)]
struct AccountInfo {
    positions: Vec<RawPosition>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    symbol: String,
    entry_price: String,
    position_amt: String,
    notional: String,
}

#[derive(Deserialize)]
struct VenueErrorBody {
    code: i64,
    msg: String,
}

impl BinanceClient {
    /// Create a client against the given REST base URL (no trailing slash)
    pub fn new(
        base_url: impl Into<String>,
        credentials: Option<Credentials>,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let quota = Quota::per_minute(
            NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap_or(NonZeroU32::MIN),
        );
        let base_url: String = base_url.into();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: credentials.map(Arc::new),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Historical candles, oldest first
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ApiError> {
        let symbol = symbol.to_uppercase();
        let rows: Vec<Vec<serde_json::Value>> = self
            .get_json(&format!(
                "/fapi/v1/klines?symbol={symbol}&interval={interval}&limit={limit}"
            ))
            .await?;

        rows.iter().map(|row| parse_kline_row(&symbol, row)).collect()
    }

    /// Latest trade price for one instrument
    pub async fn ticker_price(&self, symbol: &str) -> Result<f64, ApiError> {
        let ticker: PriceTicker = self
            .get_json(&format!(
                "/fapi/v1/ticker/price?symbol={}",
                symbol.to_uppercase()
            ))
            .await?;
        parse_f64(&ticker.price, "price")
    }

    /// Full 24-hour ticker table, for the market scan
    pub async fn ticker_24hr(&self) -> Result<Vec<Ticker24h>, ApiError> {
        let raw: Vec<RawTicker24h> = self.get_json("/fapi/v1/ticker/24hr").await?;

        raw.into_iter()
            .map(|t| {
                Ok(Ticker24h {
                    last_price: parse_f64(&t.last_price, "lastPrice")?,
                    quote_volume: parse_f64(&t.quote_volume, "quoteVolume")?,
                    symbol: t.symbol,
                })
            })
            .collect()
    }

    /// Trading rules per symbol from exchange info
    ///
    /// Symbols missing a lot-size or notional filter are skipped rather
    /// than failing the whole table.
    pub async fn exchange_rules(&self) -> Result<HashMap<String, TradingRules>, ApiError> {
        let info: ExchangeInfo = self.get_json("/fapi/v1/exchangeInfo").await?;

        let mut rules = HashMap::new();
        for symbol_info in info.symbols {
            if let Some(parsed) = parse_symbol_rules(&symbol_info) {
                rules.insert(symbol_info.symbol, parsed);
            }
        }
        Ok(rules)
    }

    /// Venue clock in milliseconds, used to timestamp signed requests
    pub async fn server_time(&self) -> Result<u64, ApiError> {
        let time: ServerTime = self.get_json("/fapi/v1/time").await?;
        Ok(time.server_time)
    }

    /// Currently held positions (non-zero notional only)
    pub async fn account_positions(&self) -> Result<Vec<VenuePosition>, ApiError> {
        let creds = self.require_credentials()?;
        let timestamp = self.server_time().await?;

        let query = format!("timestamp={timestamp}&recvWindow={RECV_WINDOW_MS}");
        let signature = sign_query(&query, &creds.api_secret)?;
        let url = format!(
            "{}/fapi/v2/account?{query}&signature={signature}",
            self.base_url
        );

        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await?;
        let account: AccountInfo = decode(response).await?;

        let mut positions = Vec::new();
        for raw in account.positions {
            let notional = parse_f64(&raw.notional, "notional")?;
            if notional.abs() > 0.0 {
                positions.push(VenuePosition {
                    entry_price: parse_f64(&raw.entry_price, "entryPrice")?,
                    position_amt: parse_f64(&raw.position_amt, "positionAmt")?,
                    symbol: raw.symbol,
                });
            }
        }
        Ok(positions)
    }

    /// Submit one market order; no retry here, callers own that policy
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderAck, ApiError> {
        let creds = self.require_credentials()?;
        let timestamp = self.server_time().await?;
        let client_order_id = Uuid::new_v4().simple().to_string();

        let query = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newClientOrderId={}&timestamp={}&recvWindow={}",
            symbol.to_uppercase(),
            side.as_str(),
            quantity.normalize(),
            client_order_id,
            timestamp,
            RECV_WINDOW_MS
        );
        let signature = sign_query(&query, &creds.api_secret)?;
        let url = format!("{}/fapi/v1/order?{query}&signature={signature}", self.base_url);

        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await?;
        decode(response).await
    }

    fn require_credentials(&self) -> Result<&Credentials, ApiError> {
        self.credentials
            .as_deref()
            .ok_or(ApiError::MissingCredentials)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.rate_limiter.until_ready().await;
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        decode(response).await
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ApiError::RateLimited);
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_rejection(status, &body));
    }

    response.json::<T>().await.map_err(ApiError::from)
}

fn classify_rejection(status: StatusCode, body: &str) -> ApiError {
    match serde_json::from_str::<VenueErrorBody>(body) {
        // -1003 is the venue's TOO_MANY_REQUESTS code
        Ok(err) if err.code == -1003 => ApiError::RateLimited,
        Ok(err) => ApiError::Rejected {
            code: err.code,
            msg: err.msg,
        },
        Err(_) => ApiError::Rejected {
            code: status.as_u16() as i64,
            msg: body.to_string(),
        },
    }
}

fn parse_symbol_rules(info: &SymbolInfo) -> Option<TradingRules> {
    let mut lot_step = None;
    let mut min_notional = None;

    for filter in &info.filters {
        match filter.filter_type.as_str() {
            "LOT_SIZE" => {
                lot_step = filter.step_size.as_deref().and_then(|s| s.parse::<Decimal>().ok());
            }
            "MIN_NOTIONAL" => {
                min_notional = filter
                    .notional
                    .as_deref()
                    .or(filter.min_notional.as_deref())
                    .and_then(|s| s.parse::<f64>().ok());
            }
            _ => {}
        }
    }

    Some(TradingRules {
        lot_step: lot_step?,
        min_notional: min_notional?,
    })
}

fn parse_kline_row(symbol: &str, row: &[serde_json::Value]) -> Result<Candle, ApiError> {
    let open_time_ms = row
        .first()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ApiError::Malformed("kline open time".to_string()))?;
    let open_time = DateTime::from_timestamp_millis(open_time_ms)
        .ok_or_else(|| ApiError::Malformed(format!("kline open time {open_time_ms}")))?;

    let number = |index: usize, field: &str| -> Result<f64, ApiError> {
        row.get(index)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| ApiError::Malformed(format!("kline {field}")))
    };

    Ok(Candle {
        symbol: symbol.to_string(),
        open_time,
        open: number(1, "open")?,
        high: number(2, "high")?,
        low: number(3, "low")?,
        close: number(4, "close")?,
        volume: number(5, "volume")?,
    })
}

fn parse_f64(value: &str, field: &str) -> Result<f64, ApiError> {
    value
        .parse::<f64>()
        .map_err(|_| ApiError::Malformed(format!("{field}: {value:?}")))
}
