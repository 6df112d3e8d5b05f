use crate::db::Store;
use crate::models::{Side, TradeResult};
use chrono::{DateTime, Duration, Utc};

/// Row cap on the historical sample
pub const MAX_SAMPLE: i64 = 50;

/// Thresholds for gating on a pair's recent track record
#[derive(Debug, Clone, Copy)]
pub struct MemoryPolicy {
    pub lookback_days: i64,
    pub strict_min_trades: usize,
    pub strict_block_winrate: f64,
    pub soft_min_trades: usize,
    pub soft_penalize_winrate: f64,
    pub penalty: i32,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            lookback_days: 14,
            strict_min_trades: 6,
            strict_block_winrate: 0.30,
            soft_min_trades: 4,
            soft_penalize_winrate: 0.45,
            penalty: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryVerdict {
    /// No recommendation this cycle for this pair, regardless of
    /// downstream scores
    Block,
    /// Continue, but subtract the penalty from the confidence
    Penalize { delta: i32 },
    Clear,
}

/// What the decision memory knows about a (symbol, side) pair
#[derive(Debug, Clone, Copy)]
pub struct MemoryReport {
    pub verdict: MemoryVerdict,
    pub sample: usize,
    pub win_rate: Option<f64>,
}

impl MemoryReport {
    /// Used when the store is unreachable: memory is advisory safety, not
    /// a hard dependency
    pub fn clear() -> Self {
        Self {
            verdict: MemoryVerdict::Clear,
            sample: 0,
            win_rate: None,
        }
    }
}

/// Evaluate closed outcomes against the policy, strict rule first
pub fn evaluate(outcomes: &[TradeResult], policy: &MemoryPolicy) -> MemoryReport {
    let total = outcomes.len();
    if total == 0 {
        return MemoryReport::clear();
    }

    let wins = outcomes
        .iter()
        .filter(|r| **r == TradeResult::Win)
        .count();
    let win_rate = wins as f64 / total as f64;

    let verdict = if total >= policy.strict_min_trades && win_rate < policy.strict_block_winrate {
        MemoryVerdict::Block
    } else if total >= policy.soft_min_trades && win_rate < policy.soft_penalize_winrate {
        MemoryVerdict::Penalize {
            delta: policy.penalty,
        }
    } else {
        MemoryVerdict::Clear
    };

    MemoryReport {
        verdict,
        sample: total,
        win_rate: Some(win_rate),
    }
}

/// Query the store for the pair's recent closed outcomes and apply the
/// policy. Any query failure degrades to "no adjustment, not blocked".
pub async fn consult(
    store: &Store,
    symbol: &str,
    side: Side,
    policy: &MemoryPolicy,
    now: DateTime<Utc>,
) -> MemoryReport {
    let since = now - Duration::days(policy.lookback_days);

    match store.closed_outcomes(symbol, side, since, MAX_SAMPLE).await {
        Ok(outcomes) => evaluate(&outcomes, policy),
        Err(e) => {
            tracing::warn!(
                "Decision memory unavailable for {} {}: {} (not blocking)",
                symbol,
                side.as_str(),
                e
            );
            MemoryReport::clear()
        }
    }
}
