/// Average Directional Index with Wilder smoothing
///
/// ADX measures trend strength (direction-agnostic); +DI and -DI carry
/// the direction. Readings above ~20-25 indicate a trending market.

use crate::models::Candle;

/// Calculate ADX, +DI and -DI at the last candle
///
/// Needs `2 * period + 1` candles for one fully smoothed ADX value;
/// returns None below that.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<(f64, f64, f64)> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let mut true_ranges = Vec::with_capacity(candles.len() - 1);
    let mut plus_dms = Vec::with_capacity(candles.len() - 1);
    let mut minus_dms = Vec::with_capacity(candles.len() - 1);

    for pair in candles.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);

        let tr = (curr.high - curr.low)
            .max((curr.high - prev.close).abs())
            .max((curr.low - prev.close).abs());
        true_ranges.push(tr);

        let up_move = curr.high - prev.high;
        let down_move = prev.low - curr.low;
        plus_dms.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dms.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
    }

    // Wilder-smoothed running sums over the first `period`, then decayed
    let mut tr_sum: f64 = true_ranges[..period].iter().sum();
    let mut plus_sum: f64 = plus_dms[..period].iter().sum();
    let mut minus_sum: f64 = minus_dms[..period].iter().sum();

    let mut dx_values = Vec::new();
    let mut plus_di = 0.0;
    let mut minus_di = 0.0;

    for i in period..true_ranges.len() {
        tr_sum = tr_sum - tr_sum / period as f64 + true_ranges[i];
        plus_sum = plus_sum - plus_sum / period as f64 + plus_dms[i];
        minus_sum = minus_sum - minus_sum / period as f64 + minus_dms[i];

        if tr_sum == 0.0 {
            dx_values.push(0.0);
            continue;
        }

        plus_di = plus_sum / tr_sum * 100.0;
        minus_di = minus_sum / tr_sum * 100.0;

        let di_sum = plus_di + minus_di;
        let dx = if di_sum == 0.0 {
            0.0
        } else {
            (plus_di - minus_di).abs() / di_sum * 100.0
        };
        dx_values.push(dx);
    }

    if dx_values.len() < period {
        return None;
    }

    let mut adx: f64 = dx_values[..period].iter().sum::<f64>() / period as f64;
    for dx in &dx_values[period..] {
        adx = (adx * (period as f64 - 1.0) + dx) / period as f64;
    }

    Some((adx, plus_di, minus_di))
}
