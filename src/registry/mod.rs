use std::collections::HashMap;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::api::BinanceClient;
use crate::config::{BotConfig, Endpoints, EvaluatorConfig, IndicatorConfig};
use crate::execution::{ExecutionGateway, RulesCache};
use crate::feed::{self, FeedTask};
use crate::lane::InstrumentLane;
use crate::models::PositionState;
use crate::store::CandleStore;
use crate::strategy::SignalEvaluator;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Owns the watch-set and the per-instrument task pair
///
/// Every add and remove funnels through this single owner, so lanes are
/// created and torn down from exactly one place. The lanes themselves
/// run fully independently once spawned.
pub struct InstrumentRegistry {
    client: BinanceClient,
    store: CandleStore,
    rules: RulesCache,
    bot_cfg: BotConfig,
    endpoints: Endpoints,
    indicator_cfg: IndicatorConfig,
    evaluator_cfg: EvaluatorConfig,
    lanes: HashMap<String, LaneHandle>,
}

struct LaneHandle {
    shutdown: watch::Sender<bool>,
    lane: JoinHandle<()>,
    feed: JoinHandle<()>,
}

impl InstrumentRegistry {
    pub fn new(
        client: BinanceClient,
        store: CandleStore,
        rules: RulesCache,
        bot_cfg: BotConfig,
        endpoints: Endpoints,
        indicator_cfg: IndicatorConfig,
        evaluator_cfg: EvaluatorConfig,
    ) -> Self {
        Self {
            client,
            store,
            rules,
            bot_cfg,
            endpoints,
            indicator_cfg,
            evaluator_cfg,
            lanes: HashMap::new(),
        }
    }

    /// Currently watched symbols
    pub fn list(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.lanes.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn is_watched(&self, symbol: &str) -> bool {
        self.lanes.contains_key(&symbol.to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Start watching an instrument; no-op when already watched
    ///
    /// Seeds the window first (bounded retry) and only then spawns the
    /// task pair, so a failed seed leaves the instrument unwatched with
    /// no resources held.
    pub async fn watch(
        &mut self,
        symbol: &str,
        initial_position: PositionState,
    ) -> crate::Result<()> {
        let symbol = symbol.to_uppercase();
        if self.lanes.contains_key(&symbol) {
            return Ok(());
        }

        let candles = feed::seed_history(
            &self.client,
            &symbol,
            &self.bot_cfg.interval,
            self.bot_cfg.window_capacity,
            self.bot_cfg.seed_retry_base,
            self.bot_cfg.seed_retry_max_attempts,
        )
        .await?;
        self.store.seed(&symbol, candles)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let feed_task = FeedTask::new(
            self.client.clone(),
            &self.bot_cfg,
            &self.endpoints,
            &symbol,
            event_tx,
            shutdown_rx.clone(),
        );
        let lane = InstrumentLane::new(
            symbol.clone(),
            self.store.clone(),
            ExecutionGateway::new(self.client.clone(), self.rules.clone()),
            SignalEvaluator::new(self.evaluator_cfg.clone()),
            self.indicator_cfg.clone(),
            self.bot_cfg.interval_duration(),
            self.bot_cfg.order_budget_usd,
            initial_position,
            event_rx,
            shutdown_rx,
        );

        self.lanes.insert(
            symbol.clone(),
            LaneHandle {
                shutdown: shutdown_tx,
                lane: tokio::spawn(lane.run()),
                feed: tokio::spawn(feed_task.run()),
            },
        );
        tracing::info!(%symbol, "watching instrument");
        Ok(())
    }

    /// Stop watching an instrument; no-op when not watched
    pub async fn unwatch(&mut self, symbol: &str) {
        let symbol = symbol.to_uppercase();
        let Some(handle) = self.lanes.remove(&symbol) else {
            return;
        };
        self.stop_lane(&symbol, handle).await;
        if let Err(err) = self.store.remove(&symbol) {
            tracing::error!(%symbol, error = %err, "failed to drop window");
        }
        tracing::info!(%symbol, "unwatched instrument");
    }

    /// Coordinated full stop, used by the restart scheduler
    ///
    /// Signals every lane before waiting on any of them, then gives each
    /// lane a grace period to finish its in-flight work.
    pub async fn shutdown_all(&mut self) {
        let handles: Vec<(String, LaneHandle)> = self.lanes.drain().collect();
        for (_, handle) in &handles {
            let _ = handle.shutdown.send(true);
        }
        for (symbol, handle) in handles {
            self.stop_lane(&symbol, handle).await;
            if let Err(err) = self.store.remove(&symbol) {
                tracing::error!(%symbol, error = %err, "failed to drop window");
            }
        }
        tracing::info!("all lanes stopped");
    }

    async fn stop_lane(&self, symbol: &str, handle: LaneHandle) {
        let _ = handle.shutdown.send(true);

        // The lane finishes its current iteration before exiting, which
        // lets an in-flight order submission confirm and apply
        let mut lane = handle.lane;
        if timeout(self.bot_cfg.shutdown_grace, &mut lane).await.is_err() {
            tracing::warn!(symbol, "lane did not drain in time, aborting");
            lane.abort();
        }
        handle.feed.abort();
    }
}
