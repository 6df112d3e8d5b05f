pub mod atr;
pub mod swing;

pub use atr::calculate_atr;
pub use swing::{swing_high, swing_low};

use crate::models::Candle;

/// ATR lookback used for level construction
pub const ATR_PERIOD: usize = 14;
/// Bars considered when locating the recent swing extreme
pub const SWING_LOOKBACK: usize = 10;
/// Minimum series length for the indicators to be considered valid
pub const MIN_CANDLES: usize = 20;

/// Volatility context for level construction: ATR plus the recent swing
/// extremes, computed together from one candle series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatilityContext {
    pub atr: f64,
    pub swing_high: f64,
    pub swing_low: f64,
}

impl VolatilityContext {
    /// Compute from an oldest-first candle series
    ///
    /// Returns None when the series is too short or ATR is non-positive;
    /// the caller falls back to range-based level construction.
    pub fn compute(candles: &[Candle]) -> Option<Self> {
        if candles.len() < MIN_CANDLES {
            return None;
        }

        let atr = calculate_atr(candles, ATR_PERIOD)?;
        if atr <= 0.0 {
            return None;
        }

        Some(Self {
            atr,
            swing_high: swing_high(candles, SWING_LOOKBACK)?,
            swing_low: swing_low(candles, SWING_LOOKBACK)?,
        })
    }
}
