// Decision state machine module
pub mod evaluator;

pub use evaluator::SignalEvaluator;

use std::time::Duration;

use crate::models::Candle;

/// Validate that a window's candles are uniformly spaced
///
/// Tolerates up to 1.5x the expected interval of jitter. A larger gap
/// means bars were lost (e.g. a reseed failed after a long disconnect)
/// and indicators over the window would be misleading, so callers skip
/// evaluation until the window heals.
pub fn validate_candle_spacing(
    candles: &[Candle],
    expected_interval: Duration,
) -> anyhow::Result<()> {
    if candles.len() < 2 {
        return Ok(());
    }

    let expected_secs = expected_interval.as_secs();
    let max_gap_secs = expected_secs + expected_secs / 2;

    for pair in candles.windows(2) {
        let gap = (pair[1].open_time - pair[0].open_time).num_seconds();

        if gap < 0 {
            anyhow::bail!("candles are not sorted by open time");
        }
        if gap as u64 > max_gap_secs {
            anyhow::bail!(
                "data gap of {}s between {} and {} (expected ~{}s, max {}s)",
                gap,
                pair[0].open_time.format("%H:%M:%S"),
                pair[1].open_time.format("%H:%M:%S"),
                expected_secs,
                max_gap_secs
            );
        }
    }

    Ok(())
}
