use crate::models::Side;

/// Confidence weights: the short timeframe dominates
const WEIGHT_24H: f64 = 6.0;
const WEIGHT_1H: f64 = 30.0;

/// Minimum momentum per timeframe for a side to be assigned
#[derive(Debug, Clone, Copy)]
pub struct MomentumThresholds {
    pub min_chg_24h: f64,
    pub min_chg_1h: f64,
}

impl Default for MomentumThresholds {
    fn default() -> Self {
        Self {
            min_chg_24h: 1.5,
            min_chg_1h: 0.4,
        }
    }
}

/// Assign a trade direction from the two momentum readings
///
/// Both timeframes must agree and independently clear their thresholds;
/// mixed or sub-threshold momentum yields no side. This is the primary
/// false-positive filter and runs before any rate-limited stage.
pub fn classify_side(chg_24h: f64, chg_1h: f64, thresholds: &MomentumThresholds) -> Option<Side> {
    if !chg_24h.is_finite() || !chg_1h.is_finite() {
        return None;
    }

    if chg_24h > thresholds.min_chg_24h && chg_1h > thresholds.min_chg_1h {
        Some(Side::Long)
    } else if chg_24h < -thresholds.min_chg_24h && chg_1h < -thresholds.min_chg_1h {
        Some(Side::Short)
    } else {
        None
    }
}

/// Base confidence from momentum magnitudes, clamped to 0..=100
///
/// Malformed numeric input is treated as "no signal".
pub fn base_confidence(chg_24h: f64, chg_1h: f64) -> Option<i32> {
    if !chg_24h.is_finite() || !chg_1h.is_finite() {
        return None;
    }

    let raw = chg_24h.abs() * WEIGHT_24H + chg_1h.abs() * WEIGHT_1H;
    Some(raw.clamp(0.0, 100.0) as i32)
}
