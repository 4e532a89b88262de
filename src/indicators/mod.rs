// Technical indicators module
// Pure functions over candle windows; no clock or I/O dependence

pub mod adx;
pub mod moving_average;
pub mod rsi;
pub mod snapshot;

pub use adx::calculate_adx;
pub use moving_average::{calculate_ema, calculate_sma};
pub use rsi::calculate_rsi;
pub use snapshot::evaluate;
