use crate::config::IndicatorConfig;
use crate::indicators::{calculate_adx, calculate_ema, calculate_rsi};
use crate::models::{Candle, IndicatorSnapshot, TrendClass};

/// Derive an indicator snapshot from a candle window
///
/// Pure and deterministic: identical windows always yield identical
/// snapshots. Below the minimum window length this returns the neutral
/// sentinel, which callers must treat as Hold.
pub fn evaluate(candles: &[Candle], cfg: &IndicatorConfig) -> IndicatorSnapshot {
    if candles.len() < cfg.min_candles() {
        return IndicatorSnapshot::neutral();
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let (Some(rsi), Some(ema_fast), Some(ema_slow), Some((adx, plus_di, minus_di))) = (
        calculate_rsi(&closes, cfg.rsi_period),
        calculate_ema(&closes, cfg.ema_fast),
        calculate_ema(&closes, cfg.ema_slow),
        calculate_adx(candles, cfg.adx_period),
    ) else {
        return IndicatorSnapshot::neutral();
    };

    let last_close = closes[closes.len() - 1];

    let trending = adx > cfg.adx_threshold;
    let ema_bullish = ema_fast > ema_slow && last_close > ema_fast;
    let ema_bearish = ema_fast < ema_slow && last_close < ema_fast;

    let trend = if trending && ema_bullish && plus_di > minus_di && rsi > cfg.rsi_trend_bull {
        TrendClass::Up
    } else if trending && ema_bearish && minus_di > plus_di && rsi < cfg.rsi_trend_bear {
        TrendClass::Down
    } else if !trending {
        TrendClass::Sideways
    } else {
        TrendClass::Unknown
    };

    IndicatorSnapshot {
        trend,
        overbought: rsi > cfg.rsi_overbought,
        oversold: rsi < cfg.rsi_oversold,
        momentum: if last_close != 0.0 {
            (ema_fast - ema_slow) / last_close
        } else {
            0.0
        },
        volume_spike: detect_volume_spike(&volumes, cfg.volume_spike_ratio),
    }
}

/// Last volume against the window average
///
/// Backfilled data can carry zero volumes, which would poison the
/// average, so any near-zero sample disables the check.
fn detect_volume_spike(volumes: &[f64], ratio_threshold: f64) -> bool {
    let Some(&current) = volumes.last() else {
        return false;
    };
    if !volumes.iter().all(|&v| v > 0.1) {
        return false;
    }

    let avg = volumes.iter().sum::<f64>() / volumes.len() as f64;
    current / avg > ratio_threshold
}
