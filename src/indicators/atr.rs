/// Average True Range (ATR)
///
/// Volatility measure: the average of true ranges over a lookback period,
/// where true range is the greatest of high-low, |high - prev close| and
/// |low - prev close|. Uses Wilder's smoothing.
use crate::models::Candle;

/// Calculate ATR over the given candles
///
/// Returns the current ATR value, or None if there is not enough data
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut true_ranges = Vec::with_capacity(candles.len() - 1);
    for window in candles.windows(2) {
        let prev_close = window[0].close;
        let high = window[1].high;
        let low = window[1].low;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        true_ranges.push(tr);
    }

    if true_ranges.len() < period {
        return None;
    }

    // Seed with the simple average of the first `period` true ranges,
    // then apply Wilder's smoothing over the rest
    let mut atr: f64 = true_ranges.iter().take(period).sum::<f64>() / period as f64;
    for tr in &true_ranges[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }

    if atr.is_finite() {
        Some(atr)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candles_from(bars: &[(f64, f64, f64)]) -> Vec<Candle> {
        bars.iter()
            .enumerate()
            .map(|(i, &(high, low, close))| Candle {
                timestamp: Utc::now() + chrono::Duration::hours(i as i64),
                open: close,
                high,
                low,
                close,
            })
            .collect()
    }

    #[test]
    fn test_flat_market_atr() {
        let candles = candles_from(&[(101.0, 99.0, 100.0); 20]);
        let atr = calculate_atr(&candles, 14).unwrap();
        // Every true range is exactly the 2.0 high-low spread
        assert!((atr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_gap_widens_true_range() {
        // Second bar gaps far above the previous close
        let mut bars = vec![(101.0, 99.0, 100.0); 15];
        bars.push((121.0, 119.0, 120.0));
        let candles = candles_from(&bars);

        let atr = calculate_atr(&candles, 14).unwrap();
        assert!(atr > 2.0, "gap should raise ATR, got {}", atr);
    }

    #[test]
    fn test_insufficient_data() {
        let candles = candles_from(&[(101.0, 99.0, 100.0), (101.0, 99.0, 100.0)]);
        assert!(calculate_atr(&candles, 14).is_none());
        assert!(calculate_atr(&candles, 0).is_none());
    }
}
