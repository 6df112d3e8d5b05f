use crate::models::{
    Levels, LevelsSource, Recommendation, RecommendationStatus, Side, TradeResult,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

/// Postgres store for recommendations and cooldowns
///
/// Single source of truth for cooldown timestamps, recommendation status
/// and the decision-memory statistics. No transaction ever spans both
/// tables.
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect and run migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    /// Cheap liveness check. The pool re-establishes connections on its
    /// own; this only surfaces a degraded database in the cycle logs.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Persist a freshly accepted recommendation (always OPEN)
    pub async fn insert_recommendation(&self, rec: &Recommendation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recommendations (
                id, ts, symbol, asset_id, name, side, entry,
                stop_loss, tp1, tp2, tp3, confidence, chg_1h, chg_24h,
                status, result, closed_at, levels_source,
                advisory_requested, advisory_applied, advisory_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(rec.id)
        .bind(rec.timestamp)
        .bind(&rec.symbol)
        .bind(&rec.asset_id)
        .bind(&rec.name)
        .bind(rec.side.as_str())
        .bind(rec.entry)
        .bind(rec.levels.stop_loss)
        .bind(rec.levels.tp1)
        .bind(rec.levels.tp2)
        .bind(rec.levels.tp3)
        .bind(rec.confidence)
        .bind(rec.chg_1h)
        .bind(rec.chg_24h)
        .bind(status_str(rec.status))
        .bind(rec.result.map(|r| r.as_str()))
        .bind(rec.closed_at)
        .bind(rec.levels_source.as_str())
        .bind(rec.advisory_requested)
        .bind(rec.advisory_applied)
        .bind(rec.advisory_reason.as_deref())
        .execute(&self.pool)
        .await
        .context("Failed to insert recommendation")?;

        tracing::debug!("Saved recommendation {} for {}", rec.id, rec.symbol);
        Ok(())
    }

    /// Transition a recommendation OPEN -> CLOSED exactly once
    ///
    /// The status predicate makes a repeated close a no-op.
    pub async fn close_recommendation(
        &self,
        id: Uuid,
        result: TradeResult,
        closed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE recommendations
            SET status = 'CLOSED', result = $2, closed_at = $3
            WHERE id = $1 AND status = 'OPEN'
            "#,
        )
        .bind(id)
        .bind(result.as_str())
        .bind(closed_at)
        .execute(&self.pool)
        .await
        .context("Failed to close recommendation")?;

        Ok(())
    }

    /// All currently OPEN recommendations, oldest first
    pub async fn open_recommendations(&self) -> Result<Vec<Recommendation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, ts, symbol, asset_id, name, side, entry,
                   stop_loss, tp1, tp2, tp3, confidence, chg_1h, chg_24h,
                   status, result, closed_at, levels_source,
                   advisory_requested, advisory_applied, advisory_reason
            FROM recommendations
            WHERE status = 'OPEN'
            ORDER BY ts ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load open recommendations")?;

        rows.into_iter().map(|row| parse_row(&row)).collect()
    }

    /// Closed outcomes for a (symbol, side) pair within the lookback,
    /// most recent first, capped
    pub async fn closed_outcomes(
        &self,
        symbol: &str,
        side: Side,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TradeResult>> {
        let rows = sqlx::query(
            r#"
            SELECT result
            FROM recommendations
            WHERE symbol = $1 AND side = $2 AND status = 'CLOSED'
              AND closed_at >= $3 AND result IS NOT NULL
            ORDER BY closed_at DESC
            LIMIT $4
            "#,
        )
        .bind(symbol)
        .bind(side.as_str())
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query closed outcomes")?;

        rows.into_iter()
            .map(|row| {
                let result: String = row.get("result");
                parse_result(&result)
            })
            .collect()
    }

    /// Last time a recommendation for this pair was accepted
    pub async fn cooldown_last_sent(
        &self,
        symbol: &str,
        side: Side,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT last_sent FROM cooldowns WHERE symbol = $1 AND side = $2",
        )
        .bind(symbol)
        .bind(side.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query cooldown")?;

        Ok(row.map(|r| r.get("last_sent")))
    }

    /// Record the acceptance timestamp for a pair
    pub async fn upsert_cooldown(
        &self,
        symbol: &str,
        side: Side,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cooldowns (symbol, side, last_sent)
            VALUES ($1, $2, $3)
            ON CONFLICT (symbol, side) DO UPDATE SET last_sent = EXCLUDED.last_sent
            "#,
        )
        .bind(symbol)
        .bind(side.as_str())
        .bind(sent_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert cooldown")?;

        Ok(())
    }
}

fn status_str(status: RecommendationStatus) -> &'static str {
    match status {
        RecommendationStatus::Open => "OPEN",
        RecommendationStatus::Closed => "CLOSED",
    }
}

fn parse_result(s: &str) -> Result<TradeResult> {
    match s {
        "WIN" => Ok(TradeResult::Win),
        "LOSS" => Ok(TradeResult::Loss),
        other => Err(anyhow!("Invalid trade result: {}", other)),
    }
}

fn parse_row(row: &sqlx::postgres::PgRow) -> Result<Recommendation> {
    let side_str: String = row.get("side");
    let status_str: String = row.get("status");
    let source_str: String = row.get("levels_source");
    let result_str: Option<String> = row.get("result");

    let status = match status_str.as_str() {
        "OPEN" => RecommendationStatus::Open,
        "CLOSED" => RecommendationStatus::Closed,
        other => return Err(anyhow!("Invalid recommendation status: {}", other)),
    };

    Ok(Recommendation {
        id: row.get("id"),
        timestamp: row.get("ts"),
        symbol: row.get("symbol"),
        asset_id: row.get("asset_id"),
        name: row.get("name"),
        side: Side::parse(&side_str).ok_or_else(|| anyhow!("Invalid side: {}", side_str))?,
        entry: row.get("entry"),
        levels: Levels {
            stop_loss: row.get("stop_loss"),
            tp1: row.get("tp1"),
            tp2: row.get("tp2"),
            tp3: row.get("tp3"),
        },
        confidence: row.get("confidence"),
        chg_1h: row.get("chg_1h"),
        chg_24h: row.get("chg_24h"),
        status,
        result: result_str.as_deref().map(parse_result).transpose()?,
        closed_at: row.get("closed_at"),
        levels_source: LevelsSource::parse(&source_str)
            .ok_or_else(|| anyhow!("Invalid levels source: {}", source_str))?,
        advisory_requested: row.get("advisory_requested"),
        advisory_applied: row.get("advisory_applied"),
        advisory_reason: row.get("advisory_reason"),
    })
}
