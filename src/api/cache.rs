use crate::clock::Clock;
use crate::models::Candle;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How long a fetched candle series stays fresh
const CANDLE_TTL_MINUTES: i64 = 10;

struct CacheEntry {
    fetched_at: DateTime<Utc>,
    candles: Vec<Candle>,
}

/// Per-asset TTL cache in front of the OHLC endpoint
///
/// Candle series only move once per bar, so re-fetching every scan cycle
/// would burn the provider's rate budget for identical data.
pub struct CandleCache {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CandleCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ttl: Duration::minutes(CANDLE_TTL_MINUTES),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh cached series for the asset, if any
    pub fn get(&self, asset_id: &str) -> Option<Vec<Candle>> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(asset_id)?;
        if self.clock.now() - entry.fetched_at > self.ttl {
            return None;
        }
        Some(entry.candles.clone())
    }

    pub fn put(&self, asset_id: &str, candles: Vec<Candle>) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            asset_id.to_string(),
            CacheEntry {
                fetched_at: self.clock.now(),
                candles,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn candle(close: f64) -> Candle {
        Candle {
            timestamp: Utc::now(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = CandleCache::new(clock.clone());

        cache.put("bitcoin", vec![candle(100.0)]);
        clock.advance(Duration::minutes(9));

        let cached = cache.get("bitcoin").unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].close, 100.0);
    }

    #[test]
    fn test_miss_after_ttl() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = CandleCache::new(clock.clone());

        cache.put("bitcoin", vec![candle(100.0)]);
        clock.advance(Duration::minutes(11));

        assert!(cache.get("bitcoin").is_none());
    }

    #[test]
    fn test_unknown_asset_misses() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = CandleCache::new(clock);
        assert!(cache.get("ethereum").is_none());
    }
}
