use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use crate::api::ApiError;
use crate::config::IndicatorConfig;
use crate::execution::{ExecutionGateway, OrderFill};
use crate::feed::FeedEvent;
use crate::indicators;
use crate::models::{Candle, Decision, PositionState, Side};
use crate::store::{AppendOutcome, CandleStore};
use crate::strategy::{self, SignalEvaluator};

/// Per-instrument processing lane
///
/// Owns the instrument's state exclusively. Window appends, indicator
/// evaluation, decisions, order submission and position updates all run
/// serialized here, so nothing ever observes a half-applied transition.
/// Errors stay inside the lane; a failing instrument never takes down
/// its neighbours or the process.
pub struct InstrumentLane {
    symbol: String,
    store: CandleStore,
    gateway: ExecutionGateway,
    evaluator: SignalEvaluator,
    indicator_cfg: IndicatorConfig,
    expected_interval: Duration,
    order_budget_usd: f64,
    position: PositionState,
    last_signal_at: Option<Instant>,
    events: mpsc::Receiver<FeedEvent>,
    shutdown: watch::Receiver<bool>,
}

impl InstrumentLane {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: String,
        store: CandleStore,
        gateway: ExecutionGateway,
        evaluator: SignalEvaluator,
        indicator_cfg: IndicatorConfig,
        expected_interval: Duration,
        order_budget_usd: f64,
        initial_position: PositionState,
        events: mpsc::Receiver<FeedEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            symbol,
            store,
            gateway,
            evaluator,
            indicator_cfg,
            expected_interval,
            order_budget_usd,
            position: initial_position,
            last_signal_at: None,
            events,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(symbol = %self.symbol, position = ?self.position, "lane started");
        loop {
            let event = tokio::select! {
                event = self.events.recv() => event,
                _ = self.shutdown.wait_for(|stop| *stop) => break,
            };
            match event {
                Some(event) => self.handle_event(event).await,
                None => break, // feed is gone
            }
        }
        tracing::info!(symbol = %self.symbol, "lane stopped");
    }

    async fn handle_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Seed(candles) => {
                if let Err(err) = self.store.seed(&self.symbol, candles) {
                    tracing::error!(symbol = %self.symbol, error = %err, "window reseed failed");
                }
            }
            FeedEvent::Closed(candle) => self.on_closed_candle(candle).await,
            FeedEvent::Tick { price } => {
                self.try_take_profit(price).await;
            }
        }
    }

    async fn on_closed_candle(&mut self, candle: Candle) {
        let close = candle.close;
        match self.store.append(candle) {
            Ok(AppendOutcome::Appended) => {}
            // Replayed or stale bar: nothing new to evaluate
            Ok(_) => return,
            Err(err) => {
                tracing::error!(symbol = %self.symbol, error = %err, "window append failed");
                return;
            }
        }

        if self.try_take_profit(close).await {
            return;
        }

        let window = match self.store.snapshot(&self.symbol) {
            Ok(window) => window,
            Err(err) => {
                tracing::error!(symbol = %self.symbol, error = %err, "window snapshot failed");
                return;
            }
        };

        if let Err(err) = strategy::validate_candle_spacing(&window, self.expected_interval) {
            tracing::warn!(
                symbol = %self.symbol,
                error = %err,
                "skipping evaluation on data quality issue"
            );
            return;
        }

        let snapshot = indicators::evaluate(&window, &self.indicator_cfg);
        let decision = self.evaluator.decide(
            &snapshot,
            &self.position,
            close,
            self.last_signal_at,
            Instant::now(),
        );

        if decision != Decision::Hold {
            tracing::info!(
                symbol = %self.symbol,
                ?decision,
                trend = ?snapshot.trend,
                momentum = snapshot.momentum,
                "decision"
            );
        }
        self.act(decision, close).await;
    }

    /// Close the position once the intrabar profit target is hit
    async fn try_take_profit(&mut self, price: f64) -> bool {
        if self.position.is_flat() {
            return false;
        }
        if !self
            .evaluator
            .cooldown_elapsed(self.last_signal_at, Instant::now())
        {
            return false;
        }
        if !self.evaluator.take_profit(&self.position, price) {
            return false;
        }

        tracing::info!(symbol = %self.symbol, price, "profit target reached");
        self.act(Decision::ExitPosition, price).await;
        true
    }

    async fn act(&mut self, decision: Decision, price: f64) {
        if price <= 0.0 {
            return;
        }

        let order = match decision {
            Decision::Hold => None,
            Decision::EnterLong => Some((Side::Buy, self.order_budget_usd / price)),
            Decision::EnterShort => Some((Side::Sell, self.order_budget_usd / price)),
            Decision::ExitPosition => {
                self.position.closing_side().zip(self.position.quantity())
            }
        };
        let Some((side, raw_quantity)) = order else {
            return;
        };

        // Emitting a signal starts the cooldown whether or not the venue
        // accepts the order; that is what bounds order frequency
        self.last_signal_at = Some(Instant::now());

        match self
            .gateway
            .submit(&self.symbol, side, raw_quantity, Some(price))
            .await
        {
            Ok(fill) => self.apply_fill(decision, &fill),
            Err(ApiError::OrderTooSmall { notional, min }) => {
                tracing::warn!(
                    symbol = %self.symbol,
                    notional,
                    min,
                    "order below venue minimum, holding"
                );
            }
            Err(err) => {
                tracing::error!(
                    symbol = %self.symbol,
                    error = %err,
                    "order failed, position unchanged"
                );
            }
        }
    }

    // Position changes only after the venue confirms
    fn apply_fill(&mut self, decision: Decision, fill: &OrderFill) {
        self.position = match decision {
            Decision::EnterLong => PositionState::Long {
                entry_price: fill.price,
                quantity: fill.quantity,
            },
            Decision::EnterShort => PositionState::Short {
                entry_price: fill.price,
                quantity: fill.quantity,
            },
            Decision::ExitPosition => PositionState::Flat,
            Decision::Hold => return,
        };
        tracing::info!(
            symbol = %self.symbol,
            order_id = fill.order_id,
            position = ?self.position,
            "position updated"
        );
    }
}
