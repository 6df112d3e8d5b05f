use crate::clock::Clock;
use crate::db::Store;
use crate::models::Side;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Per-pair cooldown ledger
///
/// The store is the durable source of truth so cooldowns survive
/// restarts. An in-process map shadows every commit and answers when the
/// store is unreachable, which fails closed: a pair that was just sent
/// stays blocked even while the database is down.
pub struct CooldownLedger {
    clock: Arc<dyn Clock>,
    window: Duration,
    local: Mutex<HashMap<(String, Side), DateTime<Utc>>>,
}

impl CooldownLedger {
    pub fn new(clock: Arc<dyn Clock>, window_minutes: i64) -> Self {
        Self {
            clock,
            window: Duration::minutes(window_minutes),
            local: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a recommendation for this pair is still inside the window
    ///
    /// Takes the most recent of the persisted and local timestamps; a
    /// store failure degrades to the local map with a warning.
    pub async fn is_blocked(&self, store: &Store, symbol: &str, side: Side) -> bool {
        let persisted = match store.cooldown_last_sent(symbol, side).await {
            Ok(ts) => ts,
            Err(e) => {
                tracing::warn!(
                    "Cooldown lookup failed for {} {}: {} (using local ledger)",
                    symbol,
                    side.as_str(),
                    e
                );
                None
            }
        };

        let local = self
            .local
            .lock()
            .unwrap()
            .get(&(symbol.to_string(), side))
            .copied();

        let last_sent = match (persisted, local) {
            (Some(p), Some(l)) => Some(p.max(l)),
            (p, l) => p.or(l),
        };

        match last_sent {
            Some(ts) => self.clock.now() - ts < self.window,
            None => false,
        }
    }

    /// Record the acceptance BEFORE the recommendation row is written
    ///
    /// If the two writes race a crash, the failure mode is a suppressed
    /// duplicate rather than a double send. A failed persist is logged
    /// and the local entry still counts.
    pub async fn commit(&self, store: &Store, symbol: &str, side: Side) {
        let now = self.clock.now();

        if let Err(e) = store.upsert_cooldown(symbol, side, now).await {
            tracing::warn!(
                "Cooldown persist failed for {} {}: {} (local ledger only)",
                symbol,
                side.as_str(),
                e
            );
        }

        self.local
            .lock()
            .unwrap()
            .insert((symbol.to_string(), side), now);
    }

    /// Window check against the local map alone
    #[cfg(test)]
    fn is_blocked_locally(&self, symbol: &str, side: Side) -> bool {
        let local = self
            .local
            .lock()
            .unwrap()
            .get(&(symbol.to_string(), side))
            .copied();
        match local {
            Some(ts) => self.clock.now() - ts < self.window,
            None => false,
        }
    }

    /// Record in the local map without touching the store
    #[cfg(test)]
    fn commit_locally(&self, symbol: &str, side: Side) {
        self.local
            .lock()
            .unwrap()
            .insert((symbol.to_string(), side), self.clock.now());
    }
}
