use crate::models::Candle;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// Outcome of appending a candle to a window
///
/// Duplicates and out-of-order appends are expected under feed replays
/// and reconnect reseeds, so they are outcomes rather than errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
    OutOfOrder,
}

/// Bounded, ordered window of closed candles for one instrument
#[derive(Debug, Default)]
struct CandleWindow {
    candles: VecDeque<Candle>,
}

impl CandleWindow {
    fn seed(&mut self, mut candles: Vec<Candle>, capacity: usize) {
        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);
        let overflow = candles.len().saturating_sub(capacity);
        self.candles = candles.into_iter().skip(overflow).collect();
    }

    fn append(&mut self, candle: Candle, capacity: usize) -> AppendOutcome {
        if let Some(newest) = self.candles.back() {
            if candle.open_time == newest.open_time {
                return AppendOutcome::Duplicate;
            }
            if candle.open_time < newest.open_time {
                return AppendOutcome::OutOfOrder;
            }
        }

        self.candles.push_back(candle);
        while self.candles.len() > capacity {
            self.candles.pop_front();
        }
        AppendOutcome::Appended
    }
}

/// Thread-safe store of per-instrument candle windows
///
/// Each window has a single writer (the instrument's lane); readers always
/// get an owned copy, never an alias into the window.
#[derive(Clone)]
pub struct CandleStore {
    data: Arc<RwLock<HashMap<String, CandleWindow>>>,
    capacity: usize,
}

impl CandleStore {
    /// Create a store whose windows hold at most `capacity` candles
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Replace an instrument's window wholesale (startup and reconnect reseed)
    pub fn seed(&self, symbol: &str, candles: Vec<Candle>) -> Result<(), String> {
        let mut data = self.data.write().map_err(|e| e.to_string())?;
        data.entry(symbol.to_string())
            .or_default()
            .seed(candles, self.capacity);
        Ok(())
    }

    /// Insert one closed candle, evicting the oldest beyond capacity
    pub fn append(&self, candle: Candle) -> Result<AppendOutcome, String> {
        let symbol = candle.symbol.clone();
        let mut data = self.data.write().map_err(|e| e.to_string())?;
        let outcome = data
            .entry(symbol.clone())
            .or_default()
            .append(candle, self.capacity);

        match outcome {
            AppendOutcome::Appended => {}
            AppendOutcome::Duplicate => tracing::debug!(%symbol, "dropped duplicate candle"),
            AppendOutcome::OutOfOrder => tracing::debug!(%symbol, "dropped out-of-order candle"),
        }
        Ok(outcome)
    }

    /// Owned, ordered copy of an instrument's window
    pub fn snapshot(&self, symbol: &str) -> Result<Vec<Candle>, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data
            .get(symbol)
            .map(|w| w.candles.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Candle count for an instrument
    pub fn len(&self, symbol: &str) -> Result<usize, String> {
        let data = self.data.read().map_err(|e| e.to_string())?;
        Ok(data.get(symbol).map(|w| w.candles.len()).unwrap_or(0))
    }

    pub fn is_empty(&self, symbol: &str) -> Result<bool, String> {
        Ok(self.len(symbol)? == 0)
    }

    /// Drop an instrument's window entirely (unwatch)
    pub fn remove(&self, symbol: &str) -> Result<(), String> {
        let mut data = self.data.write().map_err(|e| e.to_string())?;
        data.remove(symbol);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn candle_at(minute: i64, close: f64) -> Candle {
        Candle {
            symbol: "ABCUSDT".to_string(),
            open_time: DateTime::from_timestamp(minute * 60, 0).unwrap(),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 1000.0,
        }
    }

    fn open_times(store: &CandleStore) -> Vec<DateTime<Utc>> {
        store
            .snapshot("ABCUSDT")
            .unwrap()
            .iter()
            .map(|c| c.open_time)
            .collect()
    }

    #[test]
    fn test_append_and_snapshot() {
        let store = CandleStore::new(100);
        store.append(candle_at(1, 100.0)).unwrap();
        store.append(candle_at(2, 101.0)).unwrap();

        let candles = store.snapshot("ABCUSDT").unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 100.0);
        assert_eq!(candles[1].close, 101.0);
    }

    #[test]
    fn test_capacity_evicts_oldest_fifo() {
        // Capacity 5, open times 1..=6: the window must hold 2..=6
        let store = CandleStore::new(5);
        for minute in 1..=6 {
            assert_eq!(
                store.append(candle_at(minute, 100.0 + minute as f64)).unwrap(),
                AppendOutcome::Appended
            );
        }

        let candles = store.snapshot("ABCUSDT").unwrap();
        assert_eq!(candles.len(), 5);
        assert_eq!(
            open_times(&store),
            (2..=6)
                .map(|m| DateTime::from_timestamp(m * 60, 0).unwrap())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_duplicate_open_time_rejected() {
        let store = CandleStore::new(100);
        store.append(candle_at(1, 100.0)).unwrap();
        assert_eq!(
            store.append(candle_at(1, 999.0)).unwrap(),
            AppendOutcome::Duplicate
        );

        let candles = store.snapshot("ABCUSDT").unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 100.0);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let store = CandleStore::new(100);
        store.append(candle_at(5, 100.0)).unwrap();
        assert_eq!(
            store.append(candle_at(3, 99.0)).unwrap(),
            AppendOutcome::OutOfOrder
        );
        assert_eq!(store.len("ABCUSDT").unwrap(), 1);
    }

    #[test]
    fn test_window_always_sorted_no_duplicates() {
        let store = CandleStore::new(10);
        // Replay-ish sequence with duplicates and regressions mixed in
        for minute in [1, 2, 2, 3, 1, 4, 4, 5, 3, 6] {
            store.append(candle_at(minute, 100.0)).unwrap();
        }

        let times = open_times(&store);
        let mut sorted = times.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(times, sorted);
        assert_eq!(times.len(), 6);
    }

    #[test]
    fn test_seed_replaces_window() {
        let store = CandleStore::new(100);
        store.append(candle_at(50, 1.0)).unwrap();

        store
            .seed("ABCUSDT", (1..=3).map(|m| candle_at(m, 2.0)).collect())
            .unwrap();

        let candles = store.snapshot("ABCUSDT").unwrap();
        assert_eq!(candles.len(), 3);
        assert!(candles.iter().all(|c| c.close == 2.0));
    }

    #[test]
    fn test_seed_sorts_dedups_and_truncates() {
        let store = CandleStore::new(3);
        let candles = vec![
            candle_at(4, 4.0),
            candle_at(1, 1.0),
            candle_at(3, 3.0),
            candle_at(3, 3.5),
            candle_at(2, 2.0),
            candle_at(5, 5.0),
        ];
        store.seed("ABCUSDT", candles).unwrap();

        // Keeps the newest `capacity` candles, in order
        let kept = store.snapshot("ABCUSDT").unwrap();
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].close, 3.0);
        assert_eq!(kept[2].close, 5.0);
    }

    #[test]
    fn test_reseed_then_stream_does_not_duplicate_last_candle() {
        // Reconnect flow: reseed overlaps the already-streamed candle, then
        // the stream replays it once more before moving on
        let store = CandleStore::new(100);
        store.append(candle_at(1, 1.0)).unwrap();
        store.append(candle_at(2, 2.0)).unwrap();

        store
            .seed("ABCUSDT", (1..=2).map(|m| candle_at(m, m as f64)).collect())
            .unwrap();
        assert_eq!(
            store.append(candle_at(2, 2.0)).unwrap(),
            AppendOutcome::Duplicate
        );
        assert_eq!(
            store.append(candle_at(3, 3.0)).unwrap(),
            AppendOutcome::Appended
        );

        assert_eq!(store.len("ABCUSDT").unwrap(), 3);
    }

    #[test]
    fn test_remove_drops_window() {
        let store = CandleStore::new(100);
        store.append(candle_at(1, 100.0)).unwrap();
        store.remove("ABCUSDT").unwrap();
        assert!(store.is_empty("ABCUSDT").unwrap());
    }

    #[test]
    fn test_windows_are_independent_per_symbol() {
        let store = CandleStore::new(100);
        store.append(candle_at(1, 100.0)).unwrap();

        let mut other = candle_at(1, 50.0);
        other.symbol = "XYZUSDT".to_string();
        store.append(other).unwrap();

        assert_eq!(store.len("ABCUSDT").unwrap(), 1);
        assert_eq!(store.len("XYZUSDT").unwrap(), 1);
        assert_eq!(store.snapshot("XYZUSDT").unwrap()[0].close, 50.0);
    }
}
