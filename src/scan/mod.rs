use crate::api::{ApiError, BinanceClient, Ticker24h};
use crate::models::Side;

// Bases that trade flat against the quote by construction
const STABLECOIN_BASES: &[&str] = &[
    "USDC", "BUSD", "TUSD", "DAI", "FDUSD", "USDD", "GUSD", "USDP", "EUR", "EURT",
];

/// Ranked candidate produced by a market scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCandidate {
    pub symbol: String,
    pub last_price: f64,
    pub quote_volume: f64,
    pub suggested: Side,
}

/// Filter knobs for the volume scanner
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Only symbols quoted in this asset
    pub quote_suffix: String,
    /// Price ceiling for candidates
    pub max_price: f64,
    /// Candidates returned per scan
    pub limit: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            quote_suffix: "USDT".to_string(),
            max_price: 1.0,
            limit: 20,
        }
    }
}

/// Source of candidate instruments for the watch-set
pub trait MarketScanner {
    fn scan(&self) -> impl std::future::Future<Output = Result<Vec<ScanCandidate>, ApiError>> + Send;
}

/// Scanner ranking low-priced instruments by 24h quote volume
pub struct VolumeScanner {
    client: BinanceClient,
    cfg: ScanConfig,
}

impl VolumeScanner {
    pub fn new(client: BinanceClient, cfg: ScanConfig) -> Self {
        Self { client, cfg }
    }
}

impl MarketScanner for VolumeScanner {
    async fn scan(&self) -> Result<Vec<ScanCandidate>, ApiError> {
        let tickers = self.client.ticker_24hr().await?;
        let candidates = rank_candidates(tickers, &self.cfg);
        tracing::info!(candidates = candidates.len(), "market scan complete");
        Ok(candidates)
    }
}

/// Filter and rank the raw ticker table
///
/// Liquidity first: the highest quote-volume symbols under the price cap
/// lead the list. Suggested side is Buy; the indicator pipeline decides
/// actual direction once the window fills.
pub fn rank_candidates(tickers: Vec<Ticker24h>, cfg: &ScanConfig) -> Vec<ScanCandidate> {
    let mut candidates: Vec<ScanCandidate> = tickers
        .into_iter()
        .filter(|t| {
            t.symbol.ends_with(&cfg.quote_suffix)
                && !is_stablecoin_pair(&t.symbol, &cfg.quote_suffix)
                && t.last_price > 0.0
                && t.last_price < cfg.max_price
        })
        .map(|t| ScanCandidate {
            symbol: t.symbol,
            last_price: t.last_price,
            quote_volume: t.quote_volume,
            suggested: Side::Buy,
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.quote_volume
            .partial_cmp(&a.quote_volume)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(cfg.limit);
    candidates
}

fn is_stablecoin_pair(symbol: &str, quote_suffix: &str) -> bool {
    let base = symbol.trim_end_matches(quote_suffix);
    STABLECOIN_BASES.iter().any(|s| base.eq_ignore_ascii_case(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, last_price: f64, quote_volume: f64) -> Ticker24h {
        Ticker24h {
            symbol: symbol.to_string(),
            last_price,
            quote_volume,
        }
    }

    #[test]
    fn test_ranked_by_quote_volume() {
        let cfg = ScanConfig::default();
        let candidates = rank_candidates(
            vec![
                ticker("AAAUSDT", 0.5, 1_000.0),
                ticker("BBBUSDT", 0.5, 9_000.0),
                ticker("CCCUSDT", 0.5, 5_000.0),
            ],
            &cfg,
        );

        let symbols: Vec<&str> = candidates.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BBBUSDT", "CCCUSDT", "AAAUSDT"]);
    }

    #[test]
    fn test_filters_price_cap_quote_and_stablecoins() {
        let cfg = ScanConfig::default();
        let candidates = rank_candidates(
            vec![
                ticker("AAAUSDT", 0.5, 1_000.0),
                ticker("EXPENSIVEUSDT", 12.0, 9_999.0),
                ticker("AAABTC", 0.5, 9_999.0),
                ticker("USDCUSDT", 0.9999, 99_999.0),
                ticker("DEADUSDT", 0.0, 9_999.0),
            ],
            &cfg,
        );

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "AAAUSDT");
        assert_eq!(candidates[0].suggested, Side::Buy);
    }

    #[test]
    fn test_limit_truncates() {
        let cfg = ScanConfig {
            limit: 2,
            ..ScanConfig::default()
        };
        let candidates = rank_candidates(
            vec![
                ticker("AAAUSDT", 0.5, 1.0),
                ticker("BBBUSDT", 0.5, 2.0),
                ticker("CCCUSDT", 0.5, 3.0),
            ],
            &cfg,
        );
        assert_eq!(candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_volume_scanner_end_to_end() {
        let mut server = mockito::Server::new_async().await;
        let _ticker = server
            .mock("GET", "/fapi/v1/ticker/24hr")
            .with_status(200)
            .with_body(
                r#"[
                    {"symbol":"AAAUSDT","lastPrice":"0.50","quoteVolume":"1000.0"},
                    {"symbol":"BBBUSDT","lastPrice":"0.25","quoteVolume":"2000.0"}
                ]"#,
            )
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), None).unwrap();
        let scanner = VolumeScanner::new(client, ScanConfig::default());
        let candidates = scanner.scan().await.unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].symbol, "BBBUSDT");
    }
}
