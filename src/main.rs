use chrono::{Timelike, Utc};
use tokio::time::{Duration, Instant};

use trendbot::api::{BinanceClient, Credentials, VenuePosition};
use trendbot::config::{BotConfig, Endpoints, EvaluatorConfig, IndicatorConfig};
use trendbot::execution::RulesCache;
use trendbot::models::PositionState;
use trendbot::registry::InstrumentRegistry;
use trendbot::scan::{MarketScanner, ScanConfig, VolumeScanner};
use trendbot::store::CandleStore;
use trendbot::Result;

// ============================================================================
// Scheduling helpers
// ============================================================================

/// When the next clock-aligned restart boundary occurs
/// (XX:00, XX:15, XX:30, ... for a 15-minute period)
fn next_restart_boundary(period_minutes: u64) -> Instant {
    let period = period_minutes.clamp(1, 60);
    let now = Utc::now();
    let current_minute = now.minute() as u64;
    let current_second = now.second() as u64;

    let minutes_until_next = period - (current_minute % period);
    let seconds_until_next = if minutes_until_next == period && current_second == 0 {
        0 // Already at boundary
    } else {
        minutes_until_next * 60 - current_second
    };

    Instant::now() + Duration::from_secs(seconds_until_next)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    tracing::info!("🚀 trendbot starting");

    let bot_cfg = BotConfig::from_env();
    let endpoints = Endpoints::from_env();
    let evaluator_cfg = EvaluatorConfig::from_env();

    let api_key =
        std::env::var("BINANCE_API_KEY").expect("BINANCE_API_KEY not found in environment");
    let api_secret =
        std::env::var("BINANCE_API_SECRET").expect("BINANCE_API_SECRET not found in environment");

    let client = BinanceClient::new(
        endpoints.rest_base.clone(),
        Some(Credentials {
            api_key,
            api_secret,
        }),
    )?;
    let store = CandleStore::new(bot_cfg.window_capacity);
    let rules = RulesCache::new(client.clone());
    let scanner = VolumeScanner::new(client.clone(), ScanConfig::default());

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Interval: {}", bot_cfg.interval);
    tracing::info!("  Window: {} candles", bot_cfg.window_capacity);
    tracing::info!("  Max instruments: {}", bot_cfg.max_instruments);
    tracing::info!("  Order budget: ${:.2}", bot_cfg.order_budget_usd);
    tracing::info!("  Restart period: {} min", bot_cfg.restart_period_minutes);

    let mut registry = InstrumentRegistry::new(
        client.clone(),
        store,
        rules,
        bot_cfg.clone(),
        endpoints,
        IndicatorConfig::default(),
        evaluator_cfg,
    );

    loop {
        build_watch_set(&client, &scanner, &mut registry, &bot_cfg).await;

        let restart_at = next_restart_boundary(bot_cfg.restart_period_minutes);
        tracing::info!(
            "⏳ Next full restart in {:?} at the {}-minute boundary",
            restart_at - Instant::now(),
            bot_cfg.restart_period_minutes
        );

        tokio::select! {
            _ = tokio::time::sleep_until(restart_at) => {
                // A clean, coordinated restart: never a failure response
                tracing::info!("♻️  Restart boundary reached, rebuilding watch-set");
                registry.shutdown_all().await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                registry.shutdown_all().await;
                break;
            }
        }
    }

    tracing::info!("👋 trendbot stopped");
    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "trendbot=info".to_string()),
        )
        .init();
}

/// Reconcile with venue truth, then fill the remaining slots from a scan
async fn build_watch_set(
    client: &BinanceClient,
    scanner: &VolumeScanner,
    registry: &mut InstrumentRegistry,
    cfg: &BotConfig,
) {
    // Positions the venue says we hold come first; their lanes start in
    // the corresponding state instead of Flat
    match client.account_positions().await {
        Ok(positions) => {
            for position in positions {
                let initial = position_from_venue(&position);
                tracing::info!(
                    symbol = %position.symbol,
                    state = ?initial,
                    "restoring held position"
                );
                if let Err(err) = registry.watch(&position.symbol, initial).await {
                    tracing::error!(
                        symbol = %position.symbol,
                        error = %err,
                        "failed to watch held instrument"
                    );
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "account reconciliation failed, starting flat");
        }
    }

    match scanner.scan().await {
        Ok(candidates) => {
            for candidate in candidates {
                if registry.len() >= cfg.max_instruments {
                    break;
                }
                if registry.is_watched(&candidate.symbol) {
                    continue;
                }
                tracing::info!(
                    symbol = %candidate.symbol,
                    price = candidate.last_price,
                    volume = candidate.quote_volume,
                    suggested = candidate.suggested.as_str(),
                    "scan candidate"
                );
                if let Err(err) = registry.watch(&candidate.symbol, PositionState::Flat).await {
                    tracing::error!(
                        symbol = %candidate.symbol,
                        error = %err,
                        "failed to start instrument"
                    );
                }
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "market scan failed");
        }
    }

    tracing::info!("✅ Watch-set ready: {} instruments", registry.len());
    for symbol in registry.list() {
        tracing::info!("    - {}", symbol);
    }
}

fn position_from_venue(position: &VenuePosition) -> PositionState {
    if position.position_amt >= 0.0 {
        PositionState::Long {
            entry_price: position.entry_price,
            quantity: position.position_amt,
        }
    } else {
        PositionState::Short {
            entry_price: position.entry_price,
            quantity: position.position_amt.abs(),
        }
    }
}
