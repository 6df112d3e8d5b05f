use crate::models::{Levels, Side};
use serde_json::Value;

/// Confidence adjustment is clamped to this band no matter what the
/// advisor claims
pub const MAX_CONFIDENCE_ADJUST: i32 = 20;

/// Stored reasons are truncated to this many characters
pub const MAX_REASON_CHARS: usize = 120;

// ATR multiples a proposed ladder may not exceed
const STOP_RAIL_ATR: f64 = 1.35;
const TP1_RAIL_ATR: f64 = 1.2;
const TP3_RAIL_ATR: f64 = 2.8;

/// A replacement ladder may widen risk by at most this factor
const RISK_TOLERANCE: f64 = 1.15;

pub fn clamp_adjustment(raw: i64) -> i32 {
    raw.clamp(
        -(MAX_CONFIDENCE_ADJUST as i64),
        MAX_CONFIDENCE_ADJUST as i64,
    ) as i32
}

pub fn truncate_reason(reason: &str) -> String {
    reason.chars().take(MAX_REASON_CHARS).collect()
}

/// Extract a full ladder from the advisor's free-form JSON
///
/// All four keys must be present and numeric; a partial ladder is
/// discarded whole rather than merged with our own levels.
pub fn parse_levels(value: &Value) -> Option<Levels> {
    let get = |key: &str| value.get(key)?.as_f64().filter(|v| v.is_finite());
    Some(Levels {
        stop_loss: get("stop_loss")?,
        tp1: get("tp1")?,
        tp2: get("tp2")?,
        tp3: get("tp3")?,
    })
}

/// Vet a proposed replacement ladder against the local safety rails
///
/// The entry is immutable, so every check is a distance from it. Returns
/// the ladder only if it passes ordering, the ATR rails, and strictly
/// dominates the current ladder (no worse reward-to-risk, risk within
/// tolerance). Anything else keeps the builder's levels.
pub fn vet_levels(
    proposed: &Levels,
    entry: f64,
    side: Side,
    atr: f64,
    current: &Levels,
) -> Option<Levels> {
    if !atr.is_finite() || atr <= 0.0 {
        return None;
    }
    if !proposed.is_strictly_ordered(entry, side) {
        return None;
    }

    let stop_dist = (entry - proposed.stop_loss).abs();
    let tp1_dist = (proposed.tp1 - entry).abs();
    let tp3_dist = (proposed.tp3 - entry).abs();
    if stop_dist > STOP_RAIL_ATR * atr
        || tp1_dist > TP1_RAIL_ATR * atr
        || tp3_dist > TP3_RAIL_ATR * atr
    {
        return None;
    }

    if proposed.reward_to_risk_tp1(entry) < current.reward_to_risk_tp1(entry) {
        return None;
    }
    if proposed.risk(entry) > RISK_TOLERANCE * current.risk(entry) {
        return None;
    }

    Some(*proposed)
}
