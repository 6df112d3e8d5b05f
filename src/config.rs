use crate::models::Asset;
use anyhow::{bail, Context, Result};

/// When to solicit replacement price levels from the advisory service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSolicitation {
    Never,
    /// Only when the Level Builder fell back past the primary tier
    FallbackOnly,
    Always,
}

/// Engine configuration, read once at startup
///
/// Required credentials are fatal when missing; tunables fall back to the
/// reference values.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub telegram_token: String,
    pub telegram_chat_id: String,
    pub market_api_key: Option<String>,
    pub advisory_api_key: Option<String>,
    pub advisory_enabled: bool,
    pub advisory_levels: LevelSolicitation,

    pub watchlist: Vec<Asset>,
    pub scan_interval_secs: u64,
    pub confidence_threshold: i32,
    pub min_chg_24h: f64,
    pub min_chg_1h: f64,
    pub cooldown_minutes: i64,
    pub tracker_cadence_minutes: i64,

    pub memory_lookback_days: i64,
    pub strict_min_trades: usize,
    pub strict_block_winrate: f64,
    pub soft_min_trades: usize,
    pub soft_penalize_winrate: f64,
    pub memory_penalty: i32,

    pub tp1_cap_pct: f64,
    pub tp2_cap_pct: f64,
    pub tp3_cap_pct: f64,
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Default watchlist of large caps; override with WATCHLIST
const DEFAULT_WATCHLIST: &[(&str, &str, &str)] = &[
    ("BTC", "bitcoin", "Bitcoin"),
    ("ETH", "ethereum", "Ethereum"),
    ("BNB", "binancecoin", "BNB"),
    ("XRP", "ripple", "XRP"),
    ("ADA", "cardano", "Cardano"),
    ("DOGE", "dogecoin", "Dogecoin"),
    ("SOL", "solana", "Solana"),
    ("DOT", "polkadot", "Polkadot"),
    ("LTC", "litecoin", "Litecoin"),
    ("AVAX", "avalanche-2", "Avalanche"),
    ("LINK", "chainlink", "Chainlink"),
    ("ATOM", "cosmos", "Cosmos"),
];

/// Parse "SYMBOL:asset-id:Display Name" entries separated by commas
fn parse_watchlist(raw: &str) -> Result<Vec<Asset>> {
    let mut assets = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.splitn(3, ':');
        let symbol = parts.next().unwrap_or_default().trim();
        let asset_id = parts.next().unwrap_or_default().trim();
        if symbol.is_empty() || asset_id.is_empty() {
            bail!("Invalid WATCHLIST entry: {:?}", entry);
        }
        let name = parts.next().map(str::trim).unwrap_or(symbol);
        assets.push(Asset {
            symbol: symbol.to_uppercase(),
            asset_id: asset_id.to_string(),
            name: name.to_string(),
        });
    }
    if assets.is_empty() {
        bail!("WATCHLIST is set but empty");
    }
    Ok(assets)
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL not found in environment")?;
        let telegram_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .context("TELEGRAM_BOT_TOKEN not found in environment")?;
        let telegram_chat_id = std::env::var("TELEGRAM_CHAT_ID")
            .context("TELEGRAM_CHAT_ID not found in environment")?;

        let advisory_api_key = std::env::var("OPENAI_API_KEY").ok();
        let advisory_enabled = advisory_api_key.is_some()
            && std::env::var("ADVISORY_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true);

        let advisory_levels = match std::env::var("ADVISORY_LEVELS").as_deref() {
            Ok("never") => LevelSolicitation::Never,
            Ok("always") => LevelSolicitation::Always,
            _ => LevelSolicitation::FallbackOnly,
        };

        let watchlist = match std::env::var("WATCHLIST") {
            Ok(raw) => parse_watchlist(&raw)?,
            Err(_) => DEFAULT_WATCHLIST
                .iter()
                .map(|&(symbol, asset_id, name)| Asset {
                    symbol: symbol.to_string(),
                    asset_id: asset_id.to_string(),
                    name: name.to_string(),
                })
                .collect(),
        };

        Ok(Self {
            database_url,
            telegram_token,
            telegram_chat_id,
            market_api_key: std::env::var("MARKET_API_KEY").ok(),
            advisory_api_key,
            advisory_enabled,
            advisory_levels,
            watchlist,
            scan_interval_secs: env_u64("SCAN_INTERVAL_SECONDS", 60),
            confidence_threshold: env_i64("CONFIDENCE_THRESHOLD", 70) as i32,
            min_chg_24h: env_f64("MIN_CHG_24H", 1.5),
            min_chg_1h: env_f64("MIN_CHG_1H", 0.4),
            cooldown_minutes: env_i64("COOLDOWN_MINUTES", 60),
            tracker_cadence_minutes: env_i64("TRACKER_CADENCE_MINUTES", 30),
            memory_lookback_days: env_i64("MEMORY_LOOKBACK_DAYS", 14),
            strict_min_trades: env_usize("MEMORY_STRICT_MIN_TRADES", 6),
            strict_block_winrate: env_f64("MEMORY_STRICT_BLOCK_WINRATE", 0.30),
            soft_min_trades: env_usize("MEMORY_SOFT_MIN_TRADES", 4),
            soft_penalize_winrate: env_f64("MEMORY_SOFT_PENALIZE_WINRATE", 0.45),
            memory_penalty: env_i64("MEMORY_PENALTY", 10) as i32,
            tp1_cap_pct: env_f64("TP1_CAP_PCT", 3.5),
            tp2_cap_pct: env_f64("TP2_CAP_PCT", 5.5),
            tp3_cap_pct: env_f64("TP3_CAP_PCT", 12.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watchlist() {
        let assets = parse_watchlist("BTC:bitcoin:Bitcoin, eth:ethereum").unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].symbol, "BTC");
        assert_eq!(assets[0].asset_id, "bitcoin");
        assert_eq!(assets[0].name, "Bitcoin");
        // Name defaults to the symbol as given
        assert_eq!(assets[1].symbol, "ETH");
        assert_eq!(assets[1].name, "eth");
    }

    #[test]
    fn test_parse_watchlist_rejects_malformed() {
        assert!(parse_watchlist("BTC").is_err());
        assert!(parse_watchlist("  ,  ").is_err());
    }
}
