use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A whitelisted asset the engine evaluates each cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub symbol: String,
    pub asset_id: String, // canonical market-data id (e.g. "bitcoin")
    pub name: String,
}

/// Per-cycle market snapshot for one asset
///
/// Percentage changes and the 24h range come straight from the market-data
/// collaborator; any of them can be absent, in which case the dependent
/// pipeline stage drops the asset for the cycle rather than guessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub asset_id: String,
    pub name: String,
    pub price: f64,
    pub chg_1h: Option<f64>,
    pub chg_24h: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
}

/// OHLC candlestick bar, oldest-first in a series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Trade direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "LONG" => Some(Side::Long),
            "SHORT" => Some(Side::Short),
            _ => None,
        }
    }
}

/// Which Level Builder tier produced the ladder
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LevelsSource {
    Primary,
    FallbackCapped,
    FallbackRange,
}

impl LevelsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LevelsSource::Primary => "PRIMARY",
            LevelsSource::FallbackCapped => "FALLBACK_CAPPED",
            LevelsSource::FallbackRange => "FALLBACK_RANGE",
        }
    }

    pub fn parse(s: &str) -> Option<LevelsSource> {
        match s {
            "PRIMARY" => Some(LevelsSource::Primary),
            "FALLBACK_CAPPED" => Some(LevelsSource::FallbackCapped),
            "FALLBACK_RANGE" => Some(LevelsSource::FallbackRange),
            _ => None,
        }
    }
}

/// The (stop_loss, tp1, tp2, tp3) price ladder for a recommendation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Levels {
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: f64,
}

impl Levels {
    /// Strict ordering invariant: for LONG, stop < entry < tp1 < tp2 < tp3;
    /// mirrored for SHORT. Every emitted ladder must satisfy this.
    pub fn is_strictly_ordered(&self, entry: f64, side: Side) -> bool {
        let finite = entry.is_finite()
            && self.stop_loss.is_finite()
            && self.tp1.is_finite()
            && self.tp2.is_finite()
            && self.tp3.is_finite();
        if !finite {
            return false;
        }
        match side {
            Side::Long => {
                self.stop_loss < entry
                    && entry < self.tp1
                    && self.tp1 < self.tp2
                    && self.tp2 < self.tp3
            }
            Side::Short => {
                self.stop_loss > entry
                    && entry > self.tp1
                    && self.tp1 > self.tp2
                    && self.tp2 > self.tp3
            }
        }
    }

    /// Distance from entry to stop (always positive for a valid ladder)
    pub fn risk(&self, entry: f64) -> f64 {
        (entry - self.stop_loss).abs()
    }

    /// Reward-to-risk ratio measured to TP1
    pub fn reward_to_risk_tp1(&self, entry: f64) -> f64 {
        let risk = self.risk(entry);
        if risk <= 0.0 {
            return 0.0;
        }
        (self.tp1 - entry).abs() / risk
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecommendationStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeResult {
    Win,
    Loss,
}

impl TradeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeResult::Win => "WIN",
            TradeResult::Loss => "LOSS",
        }
    }
}

/// A priced, vetted trade recommendation
///
/// Created once by the orchestrator, closed exactly once by the outcome
/// tracker, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub asset_id: String,
    pub name: String,
    pub side: Side,
    pub entry: f64,
    pub levels: Levels,
    pub confidence: i32,
    pub chg_1h: f64,
    pub chg_24h: f64,
    pub status: RecommendationStatus,
    pub result: Option<TradeResult>,
    pub closed_at: Option<DateTime<Utc>>,
    pub levels_source: LevelsSource,
    pub advisory_requested: bool,
    pub advisory_applied: bool,
    pub advisory_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder(stop: f64, tp1: f64, tp2: f64, tp3: f64) -> Levels {
        Levels {
            stop_loss: stop,
            tp1,
            tp2,
            tp3,
        }
    }

    #[test]
    fn test_long_ordering() {
        let levels = ladder(97.8, 101.2, 102.0, 103.2);
        assert!(levels.is_strictly_ordered(100.0, Side::Long));
        assert!(!levels.is_strictly_ordered(100.0, Side::Short));
    }

    #[test]
    fn test_short_ordering() {
        let levels = ladder(102.2, 99.0, 98.2, 97.2);
        assert!(levels.is_strictly_ordered(100.0, Side::Short));
        assert!(!levels.is_strictly_ordered(100.0, Side::Long));
    }

    #[test]
    fn test_equal_targets_rejected() {
        let levels = ladder(97.0, 102.0, 102.0, 103.0);
        assert!(!levels.is_strictly_ordered(100.0, Side::Long));
    }

    #[test]
    fn test_non_finite_rejected() {
        let levels = ladder(97.0, f64::NAN, 102.0, 103.0);
        assert!(!levels.is_strictly_ordered(100.0, Side::Long));
    }

    #[test]
    fn test_reward_to_risk() {
        let levels = ladder(98.0, 103.0, 104.0, 105.0);
        assert!((levels.risk(100.0) - 2.0).abs() < 1e-9);
        assert!((levels.reward_to_risk_tp1(100.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_side_round_trip() {
        assert_eq!(Side::parse(Side::Long.as_str()), Some(Side::Long));
        assert_eq!(Side::parse(Side::Short.as_str()), Some(Side::Short));
        assert_eq!(Side::parse("SIDEWAYS"), None);
    }
}
