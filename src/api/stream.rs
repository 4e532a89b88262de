use chrono::DateTime;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::api::ApiError;
use crate::models::Candle;

pub type KlineSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One kline event from the venue stream
///
/// `closed` distinguishes a finished bar (appended to the window) from an
/// in-progress update (used only for intrabar price checks).
#[derive(Debug, Clone, PartialEq)]
pub struct KlineUpdate {
    pub candle: Candle,
    pub closed: bool,
}

#[derive(Deserialize)]
struct KlineEvent {
    k: KlinePayload,
}

#[derive(Deserialize)]
struct KlinePayload {
    t: i64,
    o: String,
    h: String,
    l: String,
    c: String,
    v: String,
    x: bool,
}

/// Stream endpoint for one symbol + interval subscription
pub fn stream_url(ws_base: &str, symbol: &str, interval: &str) -> String {
    format!(
        "{}/ws/{}@kline_{}",
        ws_base.trim_end_matches('/'),
        symbol.to_lowercase(),
        interval
    )
}

/// Open the kline subscription socket for one instrument
pub async fn connect_kline_stream(
    ws_base: &str,
    symbol: &str,
    interval: &str,
) -> Result<KlineSocket, ApiError> {
    let url = stream_url(ws_base, symbol, interval);
    let (socket, _) = connect_async(url.as_str())
        .await
        .map_err(|e| ApiError::Stream(e.to_string()))?;
    Ok(socket)
}

/// Parse one text frame into a kline update
///
/// Frames that are not kline events (subscription acks, unrelated
/// messages) yield None and are skipped by the feed loop.
pub fn parse_kline_message(symbol: &str, text: &str) -> Option<KlineUpdate> {
    let event: KlineEvent = serde_json::from_str(text).ok()?;
    let k = event.k;

    let candle = Candle {
        symbol: symbol.to_uppercase(),
        open_time: DateTime::from_timestamp_millis(k.t)?,
        open: k.o.parse().ok()?,
        high: k.h.parse().ok()?,
        low: k.l.parse().ok()?,
        close: k.c.parse().ok()?,
        volume: k.v.parse().ok()?,
    };

    Some(KlineUpdate {
        candle,
        closed: k.x,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLOSED_FRAME: &str = r#"{
        "e":"kline","E":1700000300010,"s":"ABCUSDT",
        "k":{"t":1700000000000,"T":1700000299999,"s":"ABCUSDT","i":"5m",
             "o":"1.0","c":"1.1","h":"1.2","l":"0.9","v":"5000.0","x":true}
    }"#;

    #[test]
    fn test_stream_url_format() {
        assert_eq!(
            stream_url("wss://fstream.binance.com", "ABCUSDT", "5m"),
            "wss://fstream.binance.com/ws/abcusdt@kline_5m"
        );
        assert_eq!(
            stream_url("wss://fstream.binance.com/", "xyzusdt", "1m"),
            "wss://fstream.binance.com/ws/xyzusdt@kline_1m"
        );
    }

    #[test]
    fn test_parse_closed_candle() {
        let update = parse_kline_message("abcusdt", CLOSED_FRAME).unwrap();

        assert!(update.closed);
        assert_eq!(update.candle.symbol, "ABCUSDT");
        assert_eq!(update.candle.open, 1.0);
        assert_eq!(update.candle.close, 1.1);
        assert_eq!(update.candle.high, 1.2);
        assert_eq!(update.candle.low, 0.9);
        assert_eq!(update.candle.volume, 5000.0);
        assert_eq!(update.candle.open_time.timestamp_millis(), 1700000000000);
    }

    #[test]
    fn test_parse_open_candle() {
        let frame = CLOSED_FRAME.replace("\"x\":true", "\"x\":false");
        let update = parse_kline_message("abcusdt", &frame).unwrap();
        assert!(!update.closed);
    }

    #[test]
    fn test_non_kline_frames_skipped() {
        assert!(parse_kline_message("abcusdt", r#"{"result":null,"id":1}"#).is_none());
        assert!(parse_kline_message("abcusdt", "not json").is_none());
    }
}
