use crate::indicators::VolatilityContext;
use crate::models::{Levels, LevelsSource, Side};

/// Stop distance in ATR multiples
const STOP_ATR_MULT: f64 = 1.10;
/// Extra ATR buffer when widening the stop past the swing extreme
const SWING_BUFFER_ATR: f64 = 0.10;
/// Target ladder in ATR multiples; SHORT runs slightly tighter
const LONG_TP_ATR: [f64; 3] = [0.6, 1.0, 1.6];
const SHORT_TP_ATR: [f64; 3] = [0.5, 0.9, 1.4];
/// The TP3 percentage cap never compresses below this many ATRs; must sit
/// under the TP3 construction multiple or the cap can never bind
const TP3_CAP_FLOOR_ATR: f64 = 1.0;
/// Range-tier targets as fractions of the 24h range
const RANGE_TP_FRACTIONS: [f64; 3] = [0.35, 0.60, 1.00];

/// Maximum percentage move from entry for each fallback target
#[derive(Debug, Clone, Copy)]
pub struct FallbackCaps {
    pub tp1_pct: f64,
    pub tp2_pct: f64,
    pub tp3_pct: f64,
}

impl Default for FallbackCaps {
    fn default() -> Self {
        Self {
            tp1_pct: 3.5,
            tp2_pct: 5.5,
            tp3_pct: 12.0,
        }
    }
}

/// Build the price ladder for a candidate
///
/// Ordered chain of tiers, first success wins: unconstrained ATR levels,
/// percentage-capped ATR levels, then 24h-range levels when no candle data
/// exists. Returns None when every tier fails; the asset is dropped for
/// the cycle rather than emitted with an invalid ladder.
pub fn build_levels(
    entry: f64,
    side: Side,
    vol: Option<&VolatilityContext>,
    high_24h: Option<f64>,
    low_24h: Option<f64>,
    caps: &FallbackCaps,
) -> Option<(Levels, LevelsSource)> {
    if !(entry.is_finite() && entry > 0.0) {
        return None;
    }

    if let Some(vol) = vol {
        if let Some(levels) = atr_levels(entry, side, vol) {
            return Some((levels, LevelsSource::Primary));
        }
        if let Some(levels) = capped_atr_levels(entry, side, vol, caps) {
            return Some((levels, LevelsSource::FallbackCapped));
        }
    }

    range_levels(entry, side, high_24h, low_24h, caps).map(|l| (l, LevelsSource::FallbackRange))
}

/// Primary tier: pure ATR construction
///
/// Stop sits 1.10 ATR from entry, widened to clear the recent swing extreme
/// by a small ATR buffer. Targets are ATR multiples, clamped so none
/// crosses the swing high/low.
fn atr_levels(entry: f64, side: Side, vol: &VolatilityContext) -> Option<Levels> {
    let atr = vol.atr;
    if atr <= 0.0 {
        return None;
    }

    let levels = match side {
        Side::Long => {
            let stop = (entry - STOP_ATR_MULT * atr).min(vol.swing_low - SWING_BUFFER_ATR * atr);
            let tp = LONG_TP_ATR.map(|m| (entry + m * atr).min(vol.swing_high));
            Levels {
                stop_loss: stop,
                tp1: tp[0],
                tp2: tp[1],
                tp3: tp[2],
            }
        }
        Side::Short => {
            let stop = (entry + STOP_ATR_MULT * atr).max(vol.swing_high + SWING_BUFFER_ATR * atr);
            let tp = SHORT_TP_ATR.map(|m| (entry - m * atr).max(vol.swing_low));
            Levels {
                stop_loss: stop,
                tp1: tp[0],
                tp2: tp[1],
                tp3: tp[2],
            }
        }
    };

    levels.is_strictly_ordered(entry, side).then_some(levels)
}

/// Fallback tier: same ATR construction, but targets are held inside the
/// percentage caps instead of the swing extremes. The TP3 cap distance has
/// a dynamic floor tied to ATR so the cap cannot land inside ordinary
/// volatility range.
fn capped_atr_levels(
    entry: f64,
    side: Side,
    vol: &VolatilityContext,
    caps: &FallbackCaps,
) -> Option<Levels> {
    let atr = vol.atr;
    if atr <= 0.0 {
        return None;
    }

    let cap_distances = [
        entry * caps.tp1_pct / 100.0,
        entry * caps.tp2_pct / 100.0,
        (entry * caps.tp3_pct / 100.0).max(TP3_CAP_FLOOR_ATR * atr),
    ];

    let levels = match side {
        Side::Long => {
            let stop = (entry - STOP_ATR_MULT * atr).min(vol.swing_low - SWING_BUFFER_ATR * atr);
            let tp: Vec<f64> = LONG_TP_ATR
                .iter()
                .zip(cap_distances.iter())
                .map(|(m, cap)| entry + (m * atr).min(*cap))
                .collect();
            Levels {
                stop_loss: stop,
                tp1: tp[0],
                tp2: tp[1],
                tp3: tp[2],
            }
        }
        Side::Short => {
            let stop = (entry + STOP_ATR_MULT * atr).max(vol.swing_high + SWING_BUFFER_ATR * atr);
            let tp: Vec<f64> = SHORT_TP_ATR
                .iter()
                .zip(cap_distances.iter())
                .map(|(m, cap)| entry - (m * atr).min(*cap))
                .collect();
            Levels {
                stop_loss: stop,
                tp1: tp[0],
                tp2: tp[1],
                tp3: tp[2],
            }
        }
    };

    levels.is_strictly_ordered(entry, side).then_some(levels)
}

/// Last-resort tier for assets with no candle series: stop at the adverse
/// 24h extreme, targets as fractions of the 24h range under the same
/// percentage caps.
fn range_levels(
    entry: f64,
    side: Side,
    high_24h: Option<f64>,
    low_24h: Option<f64>,
    caps: &FallbackCaps,
) -> Option<Levels> {
    let high = high_24h.filter(|h| h.is_finite() && *h > 0.0)?;
    let low = low_24h.filter(|l| l.is_finite() && *l > 0.0)?;
    if high <= low {
        return None;
    }
    let range = high - low;

    let cap_distances = [
        entry * caps.tp1_pct / 100.0,
        entry * caps.tp2_pct / 100.0,
        entry * caps.tp3_pct / 100.0,
    ];

    let levels = match side {
        Side::Long => {
            let tp: Vec<f64> = RANGE_TP_FRACTIONS
                .iter()
                .zip(cap_distances.iter())
                .map(|(f, cap)| entry + (f * range).min(*cap))
                .collect();
            Levels {
                stop_loss: low,
                tp1: tp[0],
                tp2: tp[1],
                tp3: tp[2],
            }
        }
        Side::Short => {
            let tp: Vec<f64> = RANGE_TP_FRACTIONS
                .iter()
                .zip(cap_distances.iter())
                .map(|(f, cap)| entry - (f * range).min(*cap))
                .collect();
            Levels {
                stop_loss: high,
                tp1: tp[0],
                tp2: tp[1],
                tp3: tp[2],
            }
        }
    };

    levels.is_strictly_ordered(entry, side).then_some(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vol(atr: f64, swing_high: f64, swing_low: f64) -> VolatilityContext {
        VolatilityContext {
            atr,
            swing_high,
            swing_low,
        }
    }

    #[test]
    fn test_primary_long_reference_scenario() {
        // entry=100, ATR=2, swing extremes wide enough that no clamp triggers
        let ctx = vol(2.0, 106.0, 98.5);
        let (levels, source) = build_levels(
            100.0,
            Side::Long,
            Some(&ctx),
            None,
            None,
            &FallbackCaps::default(),
        )
        .unwrap();

        assert_eq!(source, LevelsSource::Primary);
        // Base stop 100 - 2.2 already clears the swing low, no widening
        assert!((levels.stop_loss - 97.8).abs() < 1e-9);
        assert!((levels.tp1 - 101.2).abs() < 1e-9);
        assert!((levels.tp2 - 102.0).abs() < 1e-9);
        assert!((levels.tp3 - 103.2).abs() < 1e-9);
        assert!(levels.is_strictly_ordered(100.0, Side::Long));
    }

    #[test]
    fn test_primary_stop_widens_past_swing_low() {
        // Swing low sits below the 1.10 ATR stop, so the stop widens to
        // clear it by the 0.10 ATR buffer
        let ctx = vol(2.0, 106.0, 90.0);
        let (levels, _) = build_levels(
            100.0,
            Side::Long,
            Some(&ctx),
            None,
            None,
            &FallbackCaps::default(),
        )
        .unwrap();
        assert!((levels.stop_loss - 89.8).abs() < 1e-9);
    }

    #[test]
    fn test_primary_short_tighter_ladder() {
        let ctx = vol(2.0, 101.5, 94.0);
        let (levels, source) = build_levels(
            100.0,
            Side::Short,
            Some(&ctx),
            None,
            None,
            &FallbackCaps::default(),
        )
        .unwrap();

        assert_eq!(source, LevelsSource::Primary);
        assert!((levels.tp1 - 99.0).abs() < 1e-9);
        assert!((levels.tp2 - 98.2).abs() < 1e-9);
        assert!((levels.tp3 - 97.2).abs() < 1e-9);
        assert!(levels.is_strictly_ordered(100.0, Side::Short));
    }

    #[test]
    fn test_swing_clamp_collapse_falls_to_capped_tier() {
        // Swing high right at entry collapses the primary target ordering
        let ctx = vol(2.0, 100.5, 98.5);
        let (levels, source) = build_levels(
            100.0,
            Side::Long,
            Some(&ctx),
            None,
            None,
            &FallbackCaps::default(),
        )
        .unwrap();

        assert_eq!(source, LevelsSource::FallbackCapped);
        assert!(levels.is_strictly_ordered(100.0, Side::Long));
    }

    #[test]
    fn test_capped_tier_limits_targets() {
        // Huge ATR so the unconstrained targets blow past the caps
        let ctx = vol(20.0, 100.6, 85.0);
        let (levels, source) = build_levels(
            100.0,
            Side::Long,
            Some(&ctx),
            None,
            None,
            &FallbackCaps::default(),
        )
        .unwrap();

        assert_eq!(source, LevelsSource::FallbackCapped);
        // tp1 capped at 3.5%, tp2 at 5.5%
        assert!((levels.tp1 - 103.5).abs() < 1e-9);
        assert!((levels.tp2 - 105.5).abs() < 1e-9);
        // tp3 cap distance max(12%, 1.0 ATR) = 20, below the 32 the
        // unconstrained 1.6 ATR ladder would reach
        assert!((levels.tp3 - 120.0).abs() < 1e-9);
        assert!(levels.tp3 < 100.0 + 1.6 * ctx.atr);
    }

    #[test]
    fn test_capped_tier_pct_cap_binds_tp3() {
        // ATR 10: the floor (1.0 ATR = 10) sits below 12% of entry, so
        // the percentage cap itself limits TP3 to 112
        let ctx = vol(10.0, 100.6, 85.0);
        let (levels, source) = build_levels(
            100.0,
            Side::Long,
            Some(&ctx),
            None,
            None,
            &FallbackCaps::default(),
        )
        .unwrap();

        assert_eq!(source, LevelsSource::FallbackCapped);
        assert!((levels.tp3 - 112.0).abs() < 1e-9);
        assert!(levels.is_strictly_ordered(100.0, Side::Long));
    }

    #[test]
    fn test_range_tier_without_candles() {
        let (levels, source) = build_levels(
            100.0,
            Side::Long,
            None,
            Some(104.0),
            Some(96.0),
            &FallbackCaps::default(),
        )
        .unwrap();

        assert_eq!(source, LevelsSource::FallbackRange);
        assert!((levels.stop_loss - 96.0).abs() < 1e-9);
        // Range is 8: 0.35/0.60/1.00 fractions inside the caps
        assert!((levels.tp1 - 102.8).abs() < 1e-9);
        assert!((levels.tp2 - 104.8).abs() < 1e-9);
        assert!((levels.tp3 - 108.0).abs() < 1e-9);
        assert!(levels.is_strictly_ordered(100.0, Side::Long));
    }

    #[test]
    fn test_range_tier_short() {
        let (levels, source) = build_levels(
            100.0,
            Side::Short,
            None,
            Some(104.0),
            Some(96.0),
            &FallbackCaps::default(),
        )
        .unwrap();

        assert_eq!(source, LevelsSource::FallbackRange);
        assert!((levels.stop_loss - 104.0).abs() < 1e-9);
        assert!(levels.is_strictly_ordered(100.0, Side::Short));
    }

    #[test]
    fn test_missing_range_drops_asset() {
        let caps = FallbackCaps::default();
        assert!(build_levels(100.0, Side::Long, None, None, Some(96.0), &caps).is_none());
        assert!(build_levels(100.0, Side::Long, None, Some(0.0), Some(-1.0), &caps).is_none());
        // Entry below the 24h low: no valid LONG stop exists
        assert!(build_levels(95.0, Side::Long, None, Some(104.0), Some(96.0), &caps).is_none());
    }

    #[test]
    fn test_all_tiers_preserve_ordering_invariant() {
        let caps = FallbackCaps::default();
        let ctx = vol(2.0, 106.0, 98.5);
        for side in [Side::Long, Side::Short] {
            for (vol_opt, high, low) in [
                (Some(&ctx), None, None),
                (None, Some(104.0), Some(96.0)),
            ] {
                if let Some((levels, _)) = build_levels(100.0, side, vol_opt, high, low, &caps) {
                    assert!(levels.is_strictly_ordered(100.0, side));
                }
            }
        }
    }
}
