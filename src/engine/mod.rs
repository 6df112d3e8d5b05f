use crate::advisory::{AdvisoryClient, AdvisoryGate, AdvisoryOutcome, TradeContext};
use crate::api::{CandleCache, MarketClient};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, LevelSolicitation};
use crate::cooldown::CooldownLedger;
use crate::db::Store;
use crate::indicators::VolatilityContext;
use crate::memory::{self, MemoryPolicy, MemoryReport, MemoryVerdict};
use crate::models::{
    LevelsSource, MarketSnapshot, Recommendation, RecommendationStatus, Side,
};
use crate::notify::TelegramNotifier;
use crate::signal::{base_confidence, build_levels, classify_side, FallbackCaps, MomentumThresholds};
use crate::tracker::OutcomeTracker;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A failed snapshot fetch may serve the previous batch up to this age
const STALE_SNAPSHOT_MINUTES: i64 = 5;
/// OHLC lookback requested from the market-data collaborator
const CANDLE_DAYS: u32 = 1;

/// The scan orchestrator
///
/// Owns every collaborator and runs the whole pipeline for one cycle per
/// `tick`: resolve outcomes if due, snapshot the watchlist, evaluate each
/// asset through the gates, persist what survives, deliver one digest.
pub struct SignalEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Store,
    market: MarketClient,
    candles: CandleCache,
    advisory: AdvisoryGate,
    cooldowns: CooldownLedger,
    tracker: OutcomeTracker,
    notifier: TelegramNotifier,
    last_snapshots: Mutex<Option<(DateTime<Utc>, Vec<MarketSnapshot>)>>,
}

impl SignalEngine {
    pub fn new(config: EngineConfig, store: Store) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let market = MarketClient::new(config.market_api_key.clone())
            .context("Failed to build market client")?;

        let advisory_client = if config.advisory_enabled {
            match &config.advisory_api_key {
                Some(key) => Some(
                    AdvisoryClient::new(key.clone()).context("Failed to build advisory client")?,
                ),
                None => None,
            }
        } else {
            None
        };
        if advisory_client.is_none() {
            tracing::info!("Advisory gate disabled, candidates pass through unreviewed");
        }

        let notifier =
            TelegramNotifier::new(config.telegram_token.clone(), config.telegram_chat_id.clone())
                .context("Failed to build Telegram notifier")?;

        Ok(Self {
            advisory: AdvisoryGate::new(advisory_client, clock.clone()),
            cooldowns: CooldownLedger::new(clock.clone(), config.cooldown_minutes),
            tracker: OutcomeTracker::new(clock.clone(), config.tracker_cadence_minutes),
            candles: CandleCache::new(clock.clone()),
            notifier,
            market,
            store,
            clock,
            config,
            last_snapshots: Mutex::new(None),
        })
    }

    fn thresholds(&self) -> MomentumThresholds {
        MomentumThresholds {
            min_chg_24h: self.config.min_chg_24h,
            min_chg_1h: self.config.min_chg_1h,
        }
    }

    fn caps(&self) -> FallbackCaps {
        FallbackCaps {
            tp1_pct: self.config.tp1_cap_pct,
            tp2_pct: self.config.tp2_cap_pct,
            tp3_pct: self.config.tp3_cap_pct,
        }
    }

    fn memory_policy(&self) -> MemoryPolicy {
        MemoryPolicy {
            lookback_days: self.config.memory_lookback_days,
            strict_min_trades: self.config.strict_min_trades,
            strict_block_winrate: self.config.strict_block_winrate,
            soft_min_trades: self.config.soft_min_trades,
            soft_penalize_winrate: self.config.soft_penalize_winrate,
            penalty: self.config.memory_penalty,
        }
    }

    /// One full cycle; call once per scan interval
    pub async fn tick(&self) -> Result<()> {
        if !self.store.health_check().await {
            tracing::warn!("Database health check failed, persistence degraded this cycle");
        }

        if let Err(e) = self.tracker.run_if_due(&self.store, &self.market).await {
            tracing::warn!("Outcome tracking pass failed: {:#}", e);
        }

        let accepted = self.scan_cycle().await?;

        if accepted.is_empty() {
            tracing::debug!("Cycle complete, no recommendations");
            return Ok(());
        }

        tracing::info!("🚨 Cycle produced {} recommendation(s)", accepted.len());
        if let Err(e) = self.notifier.send(&format_digest(&accepted)).await {
            tracing::error!("Digest delivery failed: {}", e);
        }
        Ok(())
    }

    async fn scan_cycle(&self) -> Result<Vec<Recommendation>> {
        let snapshots = self.fresh_snapshots().await?;

        // One recommendation per (symbol, side) per cycle
        let mut seen: HashSet<(String, Side)> = HashSet::new();
        let mut accepted = Vec::new();

        for snap in &snapshots {
            match self.evaluate_asset(snap, &mut seen).await {
                Ok(Some(rec)) => accepted.push(rec),
                Ok(None) => {}
                // One broken asset must not take the cycle down
                Err(e) => tracing::warn!("Evaluation failed for {}: {:#}", snap.symbol, e),
            }
        }

        Ok(accepted)
    }

    /// Current snapshots, or the previous batch when the fetch fails and
    /// the previous batch is still recent enough to act on
    async fn fresh_snapshots(&self) -> Result<Vec<MarketSnapshot>> {
        match self.market.snapshots(&self.config.watchlist).await {
            Ok(snaps) => {
                *self.last_snapshots.lock().unwrap() = Some((self.clock.now(), snaps.clone()));
                Ok(snaps)
            }
            Err(e) => {
                let cached = self.last_snapshots.lock().unwrap().clone();
                match cached {
                    Some((at, snaps))
                        if self.clock.now() - at <= Duration::minutes(STALE_SNAPSHOT_MINUTES) =>
                    {
                        tracing::warn!("Snapshot fetch failed ({}), reusing batch from {}", e, at);
                        Ok(snaps)
                    }
                    _ => Err(e).context("No usable market snapshots"),
                }
            }
        }
    }

    /// Run one asset through the full gate sequence
    ///
    /// Returns the persisted recommendation if the asset survives every
    /// gate, None when any gate drops it.
    async fn evaluate_asset(
        &self,
        snap: &MarketSnapshot,
        seen: &mut HashSet<(String, Side)>,
    ) -> Result<Option<Recommendation>> {
        let (Some(chg_24h), Some(chg_1h)) = (snap.chg_24h, snap.chg_1h) else {
            tracing::debug!("{}: momentum data missing, skipping", snap.symbol);
            return Ok(None);
        };

        let Some(side) = classify_side(chg_24h, chg_1h, &self.thresholds()) else {
            return Ok(None);
        };

        if !seen.insert((snap.symbol.clone(), side)) {
            return Ok(None);
        }

        let Some(base) = base_confidence(chg_24h, chg_1h) else {
            return Ok(None);
        };

        let report = memory::consult(
            &self.store,
            &snap.symbol,
            side,
            &self.memory_policy(),
            self.clock.now(),
        )
        .await;
        if report.verdict == MemoryVerdict::Block {
            tracing::info!(
                "🧠 {} {} blocked by decision memory ({}/{} wins)",
                snap.symbol,
                side.as_str(),
                (report.win_rate.unwrap_or(0.0) * report.sample as f64).round() as usize,
                report.sample
            );
            return Ok(None);
        }

        let vol = self.volatility_context(&snap.asset_id).await;

        let Some((mut levels, source)) = build_levels(
            snap.price,
            side,
            vol.as_ref(),
            snap.high_24h,
            snap.low_24h,
            &self.caps(),
        ) else {
            tracing::debug!("{}: no valid price ladder, skipping", snap.symbol);
            return Ok(None);
        };

        let mut confidence = base;
        if let MemoryVerdict::Penalize { delta } = report.verdict {
            confidence -= delta;
            tracing::debug!(
                "{} {}: decision memory penalty -{}",
                snap.symbol,
                side.as_str(),
                delta
            );
        }

        let mut advisory_requested = false;
        let mut advisory_applied = false;
        let mut advisory_reason = None;

        if self.config.advisory_enabled {
            let request_levels = match self.config.advisory_levels {
                LevelSolicitation::Always => true,
                LevelSolicitation::FallbackOnly => source != LevelsSource::Primary,
                LevelSolicitation::Never => false,
            };
            let ctx = build_trade_context(
                snap, side, &levels, confidence, chg_1h, chg_24h,
                vol.as_ref().map(|v| v.atr),
                &report,
                request_levels,
            );

            match self.advisory.consult(&ctx).await {
                AdvisoryOutcome::Assessed(verdict) => {
                    advisory_requested = true;
                    advisory_reason = verdict.reason.clone();
                    if !verdict.approved {
                        tracing::info!(
                            "🛑 {} {} rejected by advisory: {}",
                            snap.symbol,
                            side.as_str(),
                            verdict.reason.as_deref().unwrap_or("no reason given")
                        );
                        return Ok(None);
                    }
                    confidence += verdict.confidence_delta;
                    advisory_applied = verdict.confidence_delta != 0;
                    if let Some(override_levels) = verdict.levels_override {
                        tracing::info!(
                            "🔧 {} {}: advisory ladder accepted",
                            snap.symbol,
                            side.as_str()
                        );
                        levels = override_levels;
                        advisory_applied = true;
                    } else if verdict.levels_discarded {
                        tracing::info!(
                            "🧱 {} {}: advisory ladder failed the rails, kept local levels",
                            snap.symbol,
                            side.as_str()
                        );
                        if advisory_reason.is_none() {
                            advisory_reason = Some("kept local levels".to_string());
                        }
                    }
                }
                AdvisoryOutcome::Unavailable => {
                    advisory_requested = true;
                    advisory_reason = Some("advisory unavailable".to_string());
                }
                AdvisoryOutcome::Skipped => {}
            }
        }

        let confidence = confidence.clamp(0, 100);
        if confidence < self.config.confidence_threshold {
            tracing::debug!(
                "{} {}: confidence {} below threshold {}",
                snap.symbol,
                side.as_str(),
                confidence,
                self.config.confidence_threshold
            );
            return Ok(None);
        }

        if self.cooldowns.is_blocked(&self.store, &snap.symbol, side).await {
            tracing::debug!("{} {}: on cooldown", snap.symbol, side.as_str());
            return Ok(None);
        }

        // Cooldown first: a crash between the two writes suppresses a
        // duplicate instead of allowing one
        self.cooldowns.commit(&self.store, &snap.symbol, side).await;

        let rec = Recommendation {
            id: Uuid::new_v4(),
            timestamp: self.clock.now(),
            symbol: snap.symbol.clone(),
            asset_id: snap.asset_id.clone(),
            name: snap.name.clone(),
            side,
            entry: snap.price,
            levels,
            confidence,
            chg_1h,
            chg_24h,
            status: RecommendationStatus::Open,
            result: None,
            closed_at: None,
            levels_source: source,
            advisory_requested,
            advisory_applied,
            advisory_reason,
        };

        if let Err(e) = self.store.insert_recommendation(&rec).await {
            tracing::warn!(
                "Persist failed for {} {}: {:#} (delivering anyway)",
                rec.symbol,
                rec.side.as_str(),
                e
            );
        }

        tracing::info!(
            "📊 {} {} accepted: entry {:.4}, conf {}, levels {}",
            rec.symbol,
            rec.side.as_str(),
            rec.entry,
            rec.confidence,
            rec.levels_source.as_str()
        );
        Ok(Some(rec))
    }

    /// Candle-backed volatility context, read through the TTL cache
    ///
    /// Any failure here degrades to None and the level builder falls back
    /// to the 24h range tier.
    async fn volatility_context(&self, asset_id: &str) -> Option<VolatilityContext> {
        let candles = match self.candles.get(asset_id) {
            Some(cached) => cached,
            None => match self.market.candles(asset_id, CANDLE_DAYS).await {
                Ok(fetched) => {
                    self.candles.put(asset_id, fetched.clone());
                    fetched
                }
                Err(e) => {
                    tracing::warn!("Candle fetch failed for {}: {}", asset_id, e);
                    return None;
                }
            },
        };
        VolatilityContext::compute(&candles)
    }
}

fn build_trade_context(
    snap: &MarketSnapshot,
    side: Side,
    levels: &crate::models::Levels,
    confidence: i32,
    chg_1h: f64,
    chg_24h: f64,
    atr: Option<f64>,
    report: &MemoryReport,
    request_levels: bool,
) -> TradeContext {
    TradeContext {
        symbol: snap.symbol.clone(),
        side,
        entry: snap.price,
        stop_loss: levels.stop_loss,
        tp1: levels.tp1,
        tp2: levels.tp2,
        tp3: levels.tp3,
        confidence,
        chg_1h,
        chg_24h,
        rr_tp1: levels.reward_to_risk_tp1(snap.price),
        atr,
        recent_win_rate: report.win_rate,
        request_levels,
    }
}

/// Render one cycle's recommendations as a single Telegram digest
///
/// Paragraph-separated so the chunker can split cleanly between entries.
pub fn format_digest(recs: &[Recommendation]) -> String {
    let mut sections = Vec::with_capacity(recs.len() + 1);
    sections.push(format!(
        "🚨 *Signal Digest* ({} setup{})",
        recs.len(),
        if recs.len() == 1 { "" } else { "s" }
    ));

    for rec in recs {
        let emoji = match rec.side {
            Side::Long => "📈",
            Side::Short => "📉",
        };
        let mut lines = vec![
            format!(
                "{} *{}* {} (confidence {}/100)",
                emoji,
                rec.symbol,
                rec.side.as_str(),
                rec.confidence
            ),
            format!("Entry: ${:.4}", rec.entry),
            format!("Stop: ${:.4}", rec.levels.stop_loss),
            format!(
                "TP1: ${:.4} | TP2: ${:.4} | TP3: ${:.4}",
                rec.levels.tp1, rec.levels.tp2, rec.levels.tp3
            ),
            format!("24h: {:+.2}% | 1h: {:+.2}%", rec.chg_24h, rec.chg_1h),
        ];
        if rec.levels_source != LevelsSource::Primary {
            lines.push(format!("Levels: {}", rec.levels_source.as_str()));
        }
        if let Some(reason) = &rec.advisory_reason {
            lines.push(format!("Review: {}", reason));
        }
        sections.push(lines.join("\n"));
    }

    sections.join("\n\n")
}
