use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One closed OHLCV bar for a fixed time interval
///
/// Candles are immutable once closed and ordered by `open_time`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Order side as the venue understands it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Held position for one instrument
///
/// Entry price and quantity exist exactly when a position is open,
/// so the "non-zero iff open" invariant holds by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionState {
    Flat,
    Long { entry_price: f64, quantity: f64 },
    Short { entry_price: f64, quantity: f64 },
}

impl PositionState {
    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::Flat)
    }

    /// Quantity held, if any
    pub fn quantity(&self) -> Option<f64> {
        match self {
            PositionState::Flat => None,
            PositionState::Long { quantity, .. } | PositionState::Short { quantity, .. } => {
                Some(*quantity)
            }
        }
    }

    /// Unrealized P&L in quote currency at the given price
    pub fn unrealized_pnl(&self, price: f64) -> Option<f64> {
        match self {
            PositionState::Flat => None,
            PositionState::Long {
                entry_price,
                quantity,
            } => Some((price - entry_price) * quantity),
            PositionState::Short {
                entry_price,
                quantity,
            } => Some((entry_price - price) * quantity),
        }
    }

    /// Side of the order that closes this position
    pub fn closing_side(&self) -> Option<Side> {
        match self {
            PositionState::Flat => None,
            PositionState::Long { .. } => Some(Side::Sell),
            PositionState::Short { .. } => Some(Side::Buy),
        }
    }
}

/// Trend classification derived from a candle window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendClass {
    Up,
    Down,
    Sideways,
    Unknown,
}

/// Point-in-time, immutable result of indicator computation
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub trend: TrendClass,
    pub overbought: bool,
    pub oversold: bool,
    pub momentum: f64,
    pub volume_spike: bool,
}

impl IndicatorSnapshot {
    /// Sentinel returned when the window is too short to evaluate.
    /// Callers must treat this as Hold, never as a trade signal.
    pub fn neutral() -> Self {
        Self {
            trend: TrendClass::Unknown,
            overbought: false,
            oversold: false,
            momentum: 0.0,
            volume_spike: false,
        }
    }
}

/// What the position state machine wants to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    EnterLong,
    EnterShort,
    ExitPosition,
    Hold,
}

/// Venue trading constraints for one instrument
#[derive(Debug, Clone, PartialEq)]
pub struct TradingRules {
    /// Minimum quantity increment
    pub lot_step: Decimal,
    /// Minimum order notional in quote currency
    pub min_notional: f64,
}

/// A sized, lot-rounded order ready for submission
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
}
