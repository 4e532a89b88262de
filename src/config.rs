use std::time::Duration;

/// Runtime settings for the bot
///
/// Every threshold the strategy depends on lives here rather than in code,
/// so policy changes never require touching the pipeline.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Candle interval requested from the venue (e.g. "5m")
    pub interval: String,
    /// Candles kept per instrument
    pub window_capacity: usize,
    /// Cap on concurrently watched instruments
    pub max_instruments: usize,
    /// Delay before re-establishing a dropped stream
    pub reconnect_delay: Duration,
    /// Base delay for the historical seed retry backoff
    pub seed_retry_base: Duration,
    /// Attempts before giving up on seeding an instrument
    pub seed_retry_max_attempts: u32,
    /// How long a lane may take to drain during shutdown
    pub shutdown_grace: Duration,
    /// Clock-aligned full-restart period in minutes
    pub restart_period_minutes: u64,
    /// Quote-currency budget per entry order
    pub order_budget_usd: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            interval: "5m".to_string(),
            window_capacity: 288,
            max_instruments: 10,
            reconnect_delay: Duration::from_secs(5),
            seed_retry_base: Duration::from_secs(1),
            seed_retry_max_attempts: 5,
            shutdown_grace: Duration::from_secs(10),
            restart_period_minutes: 15,
            order_budget_usd: 10.0,
        }
    }
}

impl BotConfig {
    /// Candle interval as a duration ("1m", "5m", "1h", ...)
    ///
    /// Falls back to five minutes if the interval string is unparseable.
    pub fn interval_duration(&self) -> Duration {
        parse_interval(&self.interval).unwrap_or(Duration::from_secs(300))
    }

    /// Build a config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: std::env::var("CANDLE_INTERVAL").unwrap_or(defaults.interval),
            window_capacity: env_parse("WINDOW_CAPACITY", defaults.window_capacity),
            max_instruments: env_parse("MAX_INSTRUMENTS", defaults.max_instruments),
            reconnect_delay: Duration::from_secs(env_parse(
                "RECONNECT_DELAY_SECS",
                defaults.reconnect_delay.as_secs(),
            )),
            seed_retry_base: defaults.seed_retry_base,
            seed_retry_max_attempts: env_parse(
                "SEED_RETRY_MAX_ATTEMPTS",
                defaults.seed_retry_max_attempts,
            ),
            shutdown_grace: Duration::from_secs(env_parse(
                "SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace.as_secs(),
            )),
            restart_period_minutes: env_parse(
                "RESTART_PERIOD_MINUTES",
                defaults.restart_period_minutes,
            ),
            order_budget_usd: env_parse("ORDER_BUDGET_USD", defaults.order_budget_usd),
        }
    }
}

/// Venue endpoints, overridable for testnets and tests
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub rest_base: String,
    pub ws_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            rest_base: "https://fapi.binance.com".to_string(),
            ws_base: "wss://fstream.binance.com".to_string(),
        }
    }
}

impl Endpoints {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rest_base: std::env::var("REST_BASE_URL").unwrap_or(defaults.rest_base),
            ws_base: std::env::var("WS_BASE_URL").unwrap_or(defaults.ws_base),
        }
    }
}

/// Thresholds for indicator computation
#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    /// RSI confirmation bands for trend classification
    pub rsi_trend_bull: f64,
    pub rsi_trend_bear: f64,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub adx_period: usize,
    pub adx_threshold: f64,
    /// Multiple of average volume that counts as a spike
    pub volume_spike_ratio: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            rsi_trend_bull: 60.0,
            rsi_trend_bear: 40.0,
            ema_fast: 9,
            ema_slow: 21,
            adx_period: 14,
            adx_threshold: 20.0,
            volume_spike_ratio: 1.5,
        }
    }
}

impl IndicatorConfig {
    /// Candles required before any indicator output is trusted
    ///
    /// Derived from the slowest lookback: the slow EMA plus the ADX
    /// smoothing runway.
    pub fn min_candles(&self) -> usize {
        self.ema_slow + self.adx_period
    }
}

/// Thresholds for the decision state machine
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Minimum time between two decision-producing evaluations
    pub cooldown: Duration,
    /// Absolute quote-currency P&L at which a position is taken off
    pub profit_target: f64,
    /// Reversal exits require at least this unrealized gain fraction.
    /// Zero means any reversal snapshot closes the position.
    pub min_exit_profit_pct: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            profit_target: 0.05,
            min_exit_profit_pct: 0.0,
        }
    }
}

impl EvaluatorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cooldown: Duration::from_millis(env_parse(
                "TRADE_COOLDOWN_MS",
                defaults.cooldown.as_millis() as u64,
            )),
            profit_target: env_parse("PROFIT_TARGET_USD", defaults.profit_target),
            min_exit_profit_pct: env_parse("MIN_EXIT_PROFIT_PCT", defaults.min_exit_profit_pct),
        }
    }
}

/// Parse a venue interval token like "1m", "5m" or "1h"
pub fn parse_interval(interval: &str) -> Option<Duration> {
    if interval.len() < 2 {
        return None;
    }
    let (amount, unit) = interval.split_at(interval.len() - 1);
    let amount: u64 = amount.parse().ok()?;
    let seconds = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3_600,
        "d" => amount * 86_400,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
