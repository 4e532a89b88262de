/// Exponential Moving Average over the full series, seeded with the
/// SMA of the first `period` values
///
/// Returns the EMA at the last value, or None with insufficient data.
pub fn calculate_ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;

    for value in &values[period..] {
        ema = value * k + ema * (1.0 - k);
    }

    Some(ema)
}

/// Simple Moving Average of the last `period` values
pub fn calculate_sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let start = values.len() - period;
    Some(values[start..].iter().sum::<f64>() / period as f64)
}
