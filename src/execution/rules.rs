use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::api::{ApiError, BinanceClient};
use crate::models::TradingRules;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Round a raw quantity down to the instrument's lot step
///
/// The result is always a multiple of `step` and never exceeds the raw
/// quantity. Decimal arithmetic keeps awkward steps like 0.001 exact.
pub fn round_to_step(raw_quantity: f64, step: Decimal) -> Option<Decimal> {
    if step <= Decimal::ZERO || !raw_quantity.is_finite() || raw_quantity < 0.0 {
        return None;
    }
    let raw = Decimal::from_f64_retain(raw_quantity)?;
    Some((raw / step).floor() * step)
}

/// TTL cache over the venue's per-symbol trading rules
///
/// Shared by every lane's gateway; refreshed when stale or when the
/// venue rejects an order for violating a filter.
#[derive(Clone)]
pub struct RulesCache {
    client: BinanceClient,
    ttl: Duration,
    inner: Arc<RwLock<CacheState>>,
}

#[derive(Default)]
struct CacheState {
    fetched_at: Option<Instant>,
    rules: HashMap<String, TradingRules>,
}

impl CacheState {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at
            .map(|at| at.elapsed() < ttl)
            .unwrap_or(false)
    }
}

impl RulesCache {
    pub fn new(client: BinanceClient) -> Self {
        Self::with_ttl(client, DEFAULT_TTL)
    }

    pub fn with_ttl(client: BinanceClient, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            inner: Arc::new(RwLock::new(CacheState::default())),
        }
    }

    /// Rules for one symbol, fetching the table if stale
    pub async fn get(&self, symbol: &str) -> Result<TradingRules, ApiError> {
        let symbol = symbol.to_uppercase();

        {
            let state = self.inner.read().await;
            if state.is_fresh(self.ttl) {
                return state
                    .rules
                    .get(&symbol)
                    .cloned()
                    .ok_or(ApiError::MissingRules(symbol));
            }
        }

        let mut state = self.inner.write().await;
        // Another caller may have refreshed while we waited for the lock
        if !state.is_fresh(self.ttl) {
            state.rules = self.client.exchange_rules().await?;
            state.fetched_at = Some(Instant::now());
            tracing::debug!(symbols = state.rules.len(), "refreshed trading rules");
        }

        state
            .rules
            .get(&symbol)
            .cloned()
            .ok_or(ApiError::MissingRules(symbol))
    }

    /// Drop the table so the next lookup refetches
    pub async fn invalidate(&self) {
        self.inner.write().await.fetched_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::ToPrimitive;

    fn step(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_rounding_law() {
        // Multiple of step, never above the raw quantity
        let cases = [
            (21.37, "0.1"),
            (0.04, "0.01"),
            (0.049999, "0.01"),
            (5.0, "1"),
            (123.456789, "0.001"),
            (0.0005, "0.001"),
        ];

        for (raw, s) in cases {
            let step = step(s);
            let rounded = round_to_step(raw, step).unwrap();
            assert_eq!(rounded % step, Decimal::ZERO, "{raw} @ {s}");
            assert!(rounded.to_f64().unwrap() <= raw, "{raw} @ {s}");
        }
    }

    #[test]
    fn test_rounding_exact_values() {
        assert_eq!(round_to_step(21.37, step("0.1")).unwrap(), step("21.3"));
        assert_eq!(round_to_step(0.04, step("0.01")).unwrap(), step("0.04"));
        assert_eq!(round_to_step(0.0005, step("0.001")).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_rounding_invalid_inputs() {
        assert!(round_to_step(1.0, Decimal::ZERO).is_none());
        assert!(round_to_step(-1.0, step("0.1")).is_none());
        assert!(round_to_step(f64::NAN, step("0.1")).is_none());
    }

    const EXCHANGE_INFO: &str = r#"{"symbols":[
        {"symbol":"ABCUSDT","filters":[
            {"filterType":"LOT_SIZE","stepSize":"0.01"},
            {"filterType":"MIN_NOTIONAL","notional":"5"}]}
    ]}"#;

    #[tokio::test]
    async fn test_cache_fetches_once_while_fresh() {
        let mut server = mockito::Server::new_async().await;
        let info = server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_status(200)
            .with_body(EXCHANGE_INFO)
            .expect(1)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), None).unwrap();
        let cache = RulesCache::new(client);

        let first = cache.get("ABCUSDT").await.unwrap();
        let second = cache.get("abcusdt").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.min_notional, 5.0);

        info.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let mut server = mockito::Server::new_async().await;
        let info = server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_status(200)
            .with_body(EXCHANGE_INFO)
            .expect(2)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), None).unwrap();
        let cache = RulesCache::new(client);

        cache.get("ABCUSDT").await.unwrap();
        cache.invalidate().await;
        cache.get("ABCUSDT").await.unwrap();

        info.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_missing_rules() {
        let mut server = mockito::Server::new_async().await;
        let _info = server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_status(200)
            .with_body(EXCHANGE_INFO)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), None).unwrap();
        let cache = RulesCache::new(client);

        let err = cache.get("NOPEUSDT").await.unwrap_err();
        assert!(matches!(err, ApiError::MissingRules(s) if s == "NOPEUSDT"));
    }
}
