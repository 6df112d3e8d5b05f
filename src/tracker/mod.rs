use crate::api::MarketClient;
use crate::clock::Clock;
use crate::db::Store;
use crate::models::{Recommendation, Side, TradeResult};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Judge an open recommendation against the current spot price
///
/// The stop is checked before the first target, and a touch is decisive:
/// TP1 closes the trade as a win even though later targets exist.
/// Prices between the stop and TP1 leave the trade open.
pub fn judge_outcome(rec: &Recommendation, price: f64) -> Option<TradeResult> {
    if !price.is_finite() || price <= 0.0 {
        return None;
    }
    match rec.side {
        Side::Long => {
            if price <= rec.levels.stop_loss {
                Some(TradeResult::Loss)
            } else if price >= rec.levels.tp1 {
                Some(TradeResult::Win)
            } else {
                None
            }
        }
        Side::Short => {
            if price >= rec.levels.stop_loss {
                Some(TradeResult::Loss)
            } else if price <= rec.levels.tp1 {
                Some(TradeResult::Win)
            } else {
                None
            }
        }
    }
}

/// Periodic resolver for open recommendations
///
/// Runs on its own cadence inside the scan loop. Idempotent by
/// construction: it only ever sees OPEN rows and the close query is a
/// no-op for anything already closed.
pub struct OutcomeTracker {
    clock: Arc<dyn Clock>,
    cadence: Duration,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl OutcomeTracker {
    pub fn new(clock: Arc<dyn Clock>, cadence_minutes: i64) -> Self {
        Self {
            clock,
            cadence: Duration::minutes(cadence_minutes),
            last_run: Mutex::new(None),
        }
    }

    /// Consume a cadence slot if one is available
    fn due_and_mark(&self) -> bool {
        let now = self.clock.now();
        let mut last = self.last_run.lock().unwrap();
        match *last {
            Some(ts) if now - ts < self.cadence => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Resolve what can be resolved, if the cadence allows
    ///
    /// Returns the number of recommendations closed this pass. Assets
    /// with no price this pass are left open for the next one.
    pub async fn run_if_due(&self, store: &Store, market: &MarketClient) -> Result<usize> {
        if !self.due_and_mark() {
            return Ok(0);
        }

        let open = store.open_recommendations().await?;
        if open.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = open
            .iter()
            .map(|r| r.asset_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let prices = market.current_prices(&ids).await?;

        let mut closed = 0;
        for rec in &open {
            let Some(&price) = prices.get(&rec.asset_id) else {
                tracing::debug!("No price for {} this pass, leaving open", rec.symbol);
                continue;
            };

            if let Some(result) = judge_outcome(rec, price) {
                // One failed close must not strand the rest of the pass;
                // the row stays OPEN and gets picked up next time.
                if let Err(e) = store
                    .close_recommendation(rec.id, result, self.clock.now())
                    .await
                {
                    tracing::warn!(
                        "Close failed for {} {}: {:#} (will retry next pass)",
                        rec.symbol,
                        rec.side.as_str(),
                        e
                    );
                    continue;
                }
                match result {
                    TradeResult::Win => tracing::info!(
                        "✅ {} {} hit TP1 at {:.4} (entry {:.4})",
                        rec.symbol,
                        rec.side.as_str(),
                        price,
                        rec.entry
                    ),
                    TradeResult::Loss => tracing::info!(
                        "❌ {} {} stopped out at {:.4} (entry {:.4})",
                        rec.symbol,
                        rec.side.as_str(),
                        price,
                        rec.entry
                    ),
                }
                closed += 1;
            }
        }

        if closed > 0 {
            tracing::info!("Outcome tracker closed {}/{} open trades", closed, open.len());
        }
        Ok(closed)
    }
}
