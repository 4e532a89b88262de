use std::time::Instant;

use crate::config::EvaluatorConfig;
use crate::models::{Decision, IndicatorSnapshot, PositionState, TrendClass};

/// Turns indicator snapshots into position decisions
///
/// Only state *changes* produce a decision; staying long through an
/// uptrend is a stream of Holds. A cooldown gate wraps every evaluation
/// so oscillating indicators cannot cause order storms: within the
/// cooldown of the last emitted signal the evaluator always Holds.
#[derive(Debug, Clone)]
pub struct SignalEvaluator {
    cfg: EvaluatorConfig,
}

impl SignalEvaluator {
    pub fn new(cfg: EvaluatorConfig) -> Self {
        Self { cfg }
    }

    /// Whether enough time has passed since the last emitted signal
    pub fn cooldown_elapsed(&self, last_signal_at: Option<Instant>, now: Instant) -> bool {
        match last_signal_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.cfg.cooldown,
        }
    }

    /// Evaluate one snapshot against the current position
    ///
    /// `price` is the latest close, used to gate reversal exits on the
    /// configured minimum gain. The caller records `last_signal_at` only
    /// when a non-Hold decision is actually acted on.
    pub fn decide(
        &self,
        snapshot: &IndicatorSnapshot,
        position: &PositionState,
        price: f64,
        last_signal_at: Option<Instant>,
        now: Instant,
    ) -> Decision {
        if !self.cooldown_elapsed(last_signal_at, now) {
            return Decision::Hold;
        }

        match position {
            PositionState::Flat => match snapshot.trend {
                TrendClass::Up => Decision::EnterLong,
                TrendClass::Down => Decision::EnterShort,
                TrendClass::Sideways if snapshot.oversold => Decision::EnterLong,
                TrendClass::Sideways if snapshot.overbought => Decision::EnterShort,
                _ => Decision::Hold,
            },
            PositionState::Long { .. } => {
                if Self::is_bearish(snapshot) && self.exit_gain_reached(position, price) {
                    Decision::ExitPosition
                } else {
                    Decision::Hold
                }
            }
            PositionState::Short { .. } => {
                if Self::is_bullish(snapshot) && self.exit_gain_reached(position, price) {
                    Decision::ExitPosition
                } else {
                    Decision::Hold
                }
            }
        }
    }

    /// Intrabar profit check against the latest trade price
    ///
    /// Runs on open-candle ticks as well as closes, so a position can be
    /// taken off without waiting for the bar to finish.
    pub fn take_profit(&self, position: &PositionState, price: f64) -> bool {
        position
            .unrealized_pnl(price)
            .map(|pnl| pnl >= self.cfg.profit_target)
            .unwrap_or(false)
    }

    // Reversal snapshots mirror the entry conditions
    fn is_bearish(snapshot: &IndicatorSnapshot) -> bool {
        snapshot.trend == TrendClass::Down
            || (snapshot.trend == TrendClass::Sideways && snapshot.overbought)
    }

    fn is_bullish(snapshot: &IndicatorSnapshot) -> bool {
        snapshot.trend == TrendClass::Up
            || (snapshot.trend == TrendClass::Sideways && snapshot.oversold)
    }

    fn exit_gain_reached(&self, position: &PositionState, price: f64) -> bool {
        if self.cfg.min_exit_profit_pct <= 0.0 {
            return true;
        }
        let (entry_price, pnl) = match (position, position.unrealized_pnl(price)) {
            (
                PositionState::Long { entry_price, .. } | PositionState::Short { entry_price, .. },
                Some(pnl),
            ) => (*entry_price, pnl),
            _ => return false,
        };
        let Some(quantity) = position.quantity() else {
            return false;
        };
        let basis = entry_price * quantity;
        basis > 0.0 && pnl / basis >= self.cfg.min_exit_profit_pct
    }
}
