use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use crate::api::stream::KlineSocket;
use crate::api::{self, ApiError, BinanceClient};
use crate::config::{BotConfig, Endpoints};
use crate::models::Candle;

/// Messages a feed task delivers into its instrument's lane
///
/// The lane performs every store write, so the feed never touches the
/// window directly.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Replace the window wholesale (reconnect reseed)
    Seed(Vec<Candle>),
    /// A finished bar
    Closed(Candle),
    /// Latest trade price from an in-progress bar
    Tick { price: f64 },
}

/// Fetch seed history with bounded exponential backoff
///
/// Exhausting the retries is fatal for that instrument: the caller
/// leaves it unwatched and logs the failure.
pub async fn seed_history(
    client: &BinanceClient,
    symbol: &str,
    interval: &str,
    limit: usize,
    retry_base: Duration,
    max_attempts: u32,
) -> Result<Vec<Candle>, ApiError> {
    let mut delay = retry_base;
    let mut attempt = 1;
    loop {
        match client.fetch_klines(symbol, interval, limit).await {
            Ok(candles) => return Ok(candles),
            Err(err) if attempt < max_attempts => {
                tracing::warn!(
                    symbol,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "seed fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Keeps one instrument's kline subscription alive
///
/// Connect, pump frames into the lane, and on any transport failure wait
/// a fixed delay, reseed history (the window dedups the overlap) and
/// reconnect. Reconnection retries forever; a watched instrument must
/// never silently stop updating.
pub struct FeedTask {
    client: BinanceClient,
    symbol: String,
    interval: String,
    ws_base: String,
    window_capacity: usize,
    reconnect_delay: Duration,
    seed_retry_base: Duration,
    seed_retry_max_attempts: u32,
    events: mpsc::Sender<FeedEvent>,
    shutdown: watch::Receiver<bool>,
}

impl FeedTask {
    pub fn new(
        client: BinanceClient,
        cfg: &BotConfig,
        endpoints: &Endpoints,
        symbol: &str,
        events: mpsc::Sender<FeedEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            symbol: symbol.to_uppercase(),
            interval: cfg.interval.clone(),
            ws_base: endpoints.ws_base.clone(),
            window_capacity: cfg.window_capacity,
            reconnect_delay: cfg.reconnect_delay,
            seed_retry_base: cfg.seed_retry_base,
            seed_retry_max_attempts: cfg.seed_retry_max_attempts,
            events,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match api::connect_kline_stream(&self.ws_base, &self.symbol, &self.interval).await {
                Ok(socket) => {
                    tracing::info!(symbol = %self.symbol, "stream connected");
                    if self.pump(socket).await {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(symbol = %self.symbol, error = %err, "stream connect failed");
                }
            }

            if self.wait_before_reconnect().await {
                break;
            }
            if self.reseed().await {
                break;
            }
        }
        tracing::debug!(symbol = %self.symbol, "feed task stopped");
    }

    /// Forward frames until the socket dies; true means shutdown
    async fn pump(&mut self, mut socket: KlineSocket) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return true,
                frame = socket.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(update) = api::parse_kline_message(&self.symbol, text.as_str()) {
                            let event = if update.closed {
                                FeedEvent::Closed(update.candle)
                            } else {
                                FeedEvent::Tick { price: update.candle.close }
                            };
                            if self.events.send(event).await.is_err() {
                                return true; // lane is gone
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!(symbol = %self.symbol, "stream closed by venue");
                        return false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(symbol = %self.symbol, error = %err, "stream transport error");
                        return false;
                    }
                }
            }
        }
    }

    /// Fixed pause between reconnect attempts; true means shutdown
    async fn wait_before_reconnect(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.reconnect_delay) => false,
            _ = self.shutdown.wait_for(|stop| *stop) => true,
        }
    }

    /// Refetch history after a gap so no candle is skipped
    ///
    /// The reseed takes precedence over anything buffered before the
    /// disconnect; a failed reseed is logged and the stream resumes
    /// anyway (the next closed candle appends normally).
    async fn reseed(&mut self) -> bool {
        match seed_history(
            &self.client,
            &self.symbol,
            &self.interval,
            self.window_capacity,
            self.seed_retry_base,
            self.seed_retry_max_attempts,
        )
        .await
        {
            Ok(candles) => self.events.send(FeedEvent::Seed(candles)).await.is_err(),
            Err(err) => {
                tracing::warn!(symbol = %self.symbol, error = %err, "reseed after reconnect failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KLINES_BODY: &str = r#"[[1700000000000,"1.0","1.2","0.9","1.1","5000.0",1700000299999,"0",10,"0","0","0"]]"#;

    #[tokio::test]
    async fn test_seed_history_success() {
        let mut server = mockito::Server::new_async().await;
        let klines = server
            .mock("GET", "/fapi/v1/klines?symbol=ABCUSDT&interval=5m&limit=10")
            .with_status(200)
            .with_body(KLINES_BODY)
            .expect(1)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), None).unwrap();
        let candles = seed_history(
            &client,
            "ABCUSDT",
            "5m",
            10,
            Duration::from_millis(1),
            3,
        )
        .await
        .unwrap();

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 1.1);
        klines.assert_async().await;
    }

    #[tokio::test]
    async fn test_seed_history_exhausts_bounded_retries() {
        let mut server = mockito::Server::new_async().await;
        let klines = server
            .mock("GET", "/fapi/v1/klines?symbol=ABCUSDT&interval=5m&limit=10")
            .with_status(500)
            .with_body("oops")
            .expect(3)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), None).unwrap();
        let result = seed_history(
            &client,
            "ABCUSDT",
            "5m",
            10,
            Duration::from_millis(1),
            3,
        )
        .await;

        assert!(result.is_err());
        klines.assert_async().await;
    }
}
