use crate::models::Candle;

/// Highest high over the last `lookback` candles
pub fn swing_high(candles: &[Candle], lookback: usize) -> Option<f64> {
    recent(candles, lookback)?
        .iter()
        .map(|c| c.high)
        .fold(None, |acc: Option<f64>, h| match acc {
            Some(max) if max >= h => Some(max),
            _ if h.is_finite() => Some(h),
            other => other,
        })
}

/// Lowest low over the last `lookback` candles
pub fn swing_low(candles: &[Candle], lookback: usize) -> Option<f64> {
    recent(candles, lookback)?
        .iter()
        .map(|c| c.low)
        .fold(None, |acc: Option<f64>, l| match acc {
            Some(min) if min <= l => Some(min),
            _ if l.is_finite() => Some(l),
            other => other,
        })
}

fn recent(candles: &[Candle], lookback: usize) -> Option<&[Candle]> {
    if lookback == 0 || candles.len() < lookback {
        return None;
    }
    Some(&candles[candles.len() - lookback..])
}
