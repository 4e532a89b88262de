use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::api::{ApiError, BinanceClient};
use crate::execution::rules::{round_to_step, RulesCache};
use crate::models::{OrderIntent, Side};

const MAX_ORDER_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(500);

// Venue codes that mean our cached filters are stale
const RULE_REJECTION_CODES: &[i64] = &[-1013, -4164];

/// Confirmed execution handed back to the lane
///
/// `price` is the reference price the order was sized against.
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub order_id: u64,
}

/// Turns decisions into venue orders
///
/// One gateway per instrument lane. The in-flight guard makes a second
/// submission while one is outstanding fail fast instead of risking a
/// duplicate fill.
pub struct ExecutionGateway {
    client: BinanceClient,
    rules: RulesCache,
    in_flight: Arc<AtomicBool>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl ExecutionGateway {
    pub fn new(client: BinanceClient, rules: RulesCache) -> Self {
        Self {
            client,
            rules,
            in_flight: Arc::new(AtomicBool::new(false)),
            max_attempts: MAX_ORDER_ATTEMPTS,
            backoff_base: RETRY_BACKOFF_BASE,
        }
    }

    #[cfg(test)]
    fn with_retry_policy(mut self, max_attempts: u32, backoff_base: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.backoff_base = backoff_base;
        self
    }

    /// Size, validate and submit one market order
    ///
    /// `reference_price` avoids a price lookup when the caller already
    /// has a fresh tick; without it the current ticker price is used.
    pub async fn submit(
        &self,
        symbol: &str,
        side: Side,
        raw_quantity: f64,
        reference_price: Option<f64>,
    ) -> Result<OrderFill, ApiError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ApiError::InFlight);
        }

        let result = self
            .submit_inner(symbol, side, raw_quantity, reference_price)
            .await;
        self.in_flight.store(false, Ordering::Release);
        result
    }

    async fn submit_inner(
        &self,
        symbol: &str,
        side: Side,
        raw_quantity: f64,
        reference_price: Option<f64>,
    ) -> Result<OrderFill, ApiError> {
        let rules = self.rules.get(symbol).await?;

        let quantity = round_to_step(raw_quantity, rules.lot_step).ok_or_else(|| {
            ApiError::Malformed(format!("cannot round quantity {raw_quantity}"))
        })?;

        let price = match reference_price {
            Some(p) => p,
            None => self.client.ticker_price(symbol).await?,
        };

        let notional = price * quantity.to_f64().unwrap_or(0.0);
        if quantity <= Decimal::ZERO || notional < rules.min_notional {
            return Err(ApiError::OrderTooSmall {
                notional,
                min: rules.min_notional,
            });
        }

        let intent = OrderIntent {
            symbol: symbol.to_uppercase(),
            side,
            quantity,
        };
        tracing::info!(
            symbol = %intent.symbol,
            side = intent.side.as_str(),
            quantity = %intent.quantity,
            price,
            notional,
            "submitting market order"
        );

        let mut delay = self.backoff_base;
        let mut attempt = 1;
        loop {
            match self
                .client
                .place_market_order(&intent.symbol, intent.side, intent.quantity)
                .await
            {
                Ok(ack) => {
                    tracing::info!(
                        symbol = %intent.symbol,
                        order_id = ack.order_id,
                        status = %ack.status,
                        "order accepted"
                    );
                    return Ok(OrderFill {
                        symbol: intent.symbol,
                        side: intent.side,
                        quantity: quantity.to_f64().unwrap_or(raw_quantity),
                        price,
                        order_id: ack.order_id,
                    });
                }
                Err(err) if err.is_rate_limited() && attempt < self.max_attempts => {
                    tracing::warn!(
                        symbol = %intent.symbol,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "order rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => {
                    if let ApiError::Rejected { code, .. } = &err {
                        if RULE_REJECTION_CODES.contains(code) {
                            self.rules.invalidate().await;
                        }
                    }
                    return Err(err);
                }
            }
        }
    }

    #[cfg(test)]
    fn set_in_flight(&self, value: bool) {
        self.in_flight.store(value, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Credentials;

    const EXCHANGE_INFO: &str = r#"{"symbols":[
        {"symbol":"ABCUSDT","filters":[
            {"filterType":"LOT_SIZE","stepSize":"0.01"},
            {"filterType":"MIN_NOTIONAL","notional":"5"}]}
    ]}"#;

    const SERVER_TIME: &str = r#"{"serverTime":1700000000000}"#;
    const ORDER_ACK: &str =
        r#"{"orderId":99,"symbol":"ABCUSDT","status":"NEW","clientOrderId":"x"}"#;

    async fn mock_common(server: &mut mockito::Server) {
        server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_status(200)
            .with_body(EXCHANGE_INFO)
            .create_async()
            .await;
        server
            .mock("GET", "/fapi/v1/time")
            .with_status(200)
            .with_body(SERVER_TIME)
            .create_async()
            .await;
    }

    fn gateway_for(server: &mockito::Server) -> ExecutionGateway {
        let client = BinanceClient::new(
            server.url(),
            Some(Credentials {
                api_key: "k".to_string(),
                api_secret: "s".to_string(),
            }),
        )
        .unwrap();
        ExecutionGateway::new(client.clone(), RulesCache::new(client))
            .with_retry_policy(3, Duration::from_millis(10))
    }

    fn order_matcher() -> mockito::Matcher {
        mockito::Matcher::Regex(r"^/fapi/v1/order\?.*$".to_string())
    }

    #[tokio::test]
    async fn test_order_below_min_notional_never_submitted() {
        let mut server = mockito::Server::new_async().await;
        mock_common(&mut server).await;
        let order = server
            .mock("POST", order_matcher())
            .with_status(200)
            .with_body(ORDER_ACK)
            .expect(0)
            .create_async()
            .await;

        // price 100 x qty 0.04 = notional 4, minimum is 5
        let err = gateway_for(&server)
            .submit("ABCUSDT", Side::Buy, 0.04, Some(100.0))
            .await
            .unwrap_err();

        match err {
            ApiError::OrderTooSmall { notional, min } => {
                assert!((notional - 4.0).abs() < 1e-9);
                assert_eq!(min, 5.0);
            }
            other => panic!("expected OrderTooSmall, got {other:?}"),
        }
        order.assert_async().await;
    }

    #[tokio::test]
    async fn test_quantity_rounded_to_lot_step() {
        let mut server = mockito::Server::new_async().await;
        mock_common(&mut server).await;
        let order = server
            .mock(
                "POST",
                mockito::Matcher::Regex(r"^/fapi/v1/order\?.*quantity=21\.37&.*$".to_string()),
            )
            .with_status(200)
            .with_body(ORDER_ACK)
            .expect(1)
            .create_async()
            .await;

        // 21.378 rounds down to 21.37 on a 0.01 step
        let fill = gateway_for(&server)
            .submit("ABCUSDT", Side::Buy, 21.378, Some(1.0))
            .await
            .unwrap();

        assert_eq!(fill.order_id, 99);
        assert_eq!(fill.quantity, 21.37);
        order.assert_async().await;
    }

    #[tokio::test]
    async fn test_in_flight_guard_rejects_second_submit() {
        let mut server = mockito::Server::new_async().await;
        mock_common(&mut server).await;
        let order = server
            .mock("POST", order_matcher())
            .with_status(200)
            .with_body(ORDER_ACK)
            .expect(0)
            .create_async()
            .await;

        let gateway = gateway_for(&server);
        gateway.set_in_flight(true);

        let err = gateway
            .submit("ABCUSDT", Side::Buy, 10.0, Some(1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InFlight));
        order.assert_async().await;

        // Releasing the guard lets the next submission through
        gateway.set_in_flight(false);
        let second = server
            .mock("POST", order_matcher())
            .with_status(200)
            .with_body(ORDER_ACK)
            .expect(1)
            .create_async()
            .await;
        gateway
            .submit("ABCUSDT", Side::Buy, 10.0, Some(1.0))
            .await
            .unwrap();
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_bounded_retry() {
        let mut server = mockito::Server::new_async().await;
        mock_common(&mut server).await;
        let order = server
            .mock("POST", order_matcher())
            .with_status(429)
            .with_body("busy")
            .expect(3)
            .create_async()
            .await;

        let err = gateway_for(&server)
            .submit("ABCUSDT", Side::Buy, 10.0, Some(1.0))
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        order.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        mock_common(&mut server).await;
        let order = server
            .mock("POST", order_matcher())
            .with_status(400)
            .with_body(r#"{"code":-2019,"msg":"Margin is insufficient."}"#)
            .expect(1)
            .create_async()
            .await;

        let err = gateway_for(&server)
            .submit("ABCUSDT", Side::Sell, 10.0, Some(1.0))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Rejected { code: -2019, .. }));
        order.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_submits_yield_one_order() {
        let mut server = mockito::Server::new_async().await;
        mock_common(&mut server).await;
        let order = server
            .mock("POST", order_matcher())
            .with_status(200)
            .with_body(ORDER_ACK)
            .expect(1)
            .create_async()
            .await;

        let gateway = Arc::new(gateway_for(&server));
        let a = {
            let g = gateway.clone();
            tokio::spawn(async move { g.submit("ABCUSDT", Side::Buy, 10.0, Some(1.0)).await })
        };
        let b = {
            let g = gateway.clone();
            tokio::spawn(async move { g.submit("ABCUSDT", Side::Buy, 10.0, Some(1.0)).await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        let in_flight = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(ApiError::InFlight)))
            .count();

        // Exactly one hits the venue; the loser may also have lost the
        // race entirely and submitted after the winner finished, so only
        // assert when the guard actually fired
        if in_flight == 1 {
            assert_eq!(successes, 1);
            order.assert_async().await;
        } else {
            assert_eq!(successes, 2);
        }
    }
}
