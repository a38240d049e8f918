use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use common::{
    Direction, Error, EventKind, OutcomeRecord, Result, ScoreBucket, Signal, SignalEvent,
    SignalOutcome, SignalState, Timeframe,
};

/// Filter for the active-signal listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveFilter {
    pub min_probability: u8,
    pub min_risk_reward: f64,
}

impl ActiveFilter {
    /// No filtering; used by the monitoring pass, which must see every
    /// open signal regardless of quality thresholds.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Aggregated outcome counts for a score range.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeStats {
    pub total: u32,
    pub wins: u32,
    pub losses: u32,
}

/// Persistence contract consumed by the generator, lifecycle manager and
/// calibration engine. The storage layer must enforce at-most-one outcome
/// per signal; `insert_outcome` surfaces a violation as
/// `Error::OutcomeConflict`.
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn create_signal(&self, signal: &Signal) -> Result<()>;

    async fn read_signal(&self, id: &str) -> Result<Option<Signal>>;

    /// Open signals (active or partially closed), oldest first.
    async fn read_active_signals(&self, filter: &ActiveFilter) -> Result<Vec<Signal>>;

    async fn update_stop_loss(&self, id: &str, stop_loss: f64) -> Result<()>;

    async fn set_close_percent(
        &self,
        id: &str,
        close_percent: u8,
        state: SignalState,
    ) -> Result<()>;

    async fn set_state(
        &self,
        id: &str,
        state: SignalState,
        close_price: Option<f64>,
        outcome: Option<SignalOutcome>,
    ) -> Result<()>;

    async fn insert_outcome(&self, outcome: &OutcomeRecord) -> Result<()>;

    /// Whether an open signal of `direction` was created at or after `since`.
    async fn has_recent_signal(&self, direction: Direction, since: DateTime<Utc>) -> Result<bool>;

    async fn read_score_buckets(&self) -> Result<Vec<ScoreBucket>>;

    async fn bucket_for_score(&self, score: u32) -> Result<Option<ScoreBucket>>;

    async fn update_bucket_stats(
        &self,
        id: i64,
        total: u32,
        wins: u32,
        losses: u32,
        hit_rate: f64,
    ) -> Result<()>;

    async fn set_adjusted_probability(&self, id: i64, probability: u8) -> Result<()>;

    async fn outcome_stats_for_range(&self, min_score: u32, max_score: u32)
        -> Result<OutcomeStats>;

    async fn append_event(&self, event: &SignalEvent) -> Result<()>;

    async fn read_events(&self, signal_id: &str) -> Result<Vec<SignalEvent>>;
}

/// Run the embedded migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Other(format!("migration failed: {e}")))
}

/// SQLite-backed implementation of [`SignalStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fresh in-memory database with migrations applied. A single
    /// connection keeps every handle on the same memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SignalStore for SqliteStore {
    async fn create_signal(&self, signal: &Signal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signals
                (id, direction, entry_price, stop_loss,
                 take_profit_1, take_profit_2, take_profit_3,
                 probability, risk_reward_ratio, reason, timeframe, score,
                 state, close_percent, close_price, outcome, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.id)
        .bind(signal.direction.to_string())
        .bind(signal.entry_price)
        .bind(signal.stop_loss)
        .bind(signal.take_profit_1)
        .bind(signal.take_profit_2)
        .bind(signal.take_profit_3)
        .bind(i64::from(signal.probability))
        .bind(signal.risk_reward_ratio)
        .bind(&signal.reason)
        .bind(signal.timeframe.to_string())
        .bind(i64::from(signal.score))
        .bind(signal.state.to_string())
        .bind(i64::from(signal.close_percent))
        .bind(signal.close_price)
        .bind(signal.outcome.map(|o| o.to_string()))
        .bind(signal.created_at.to_rfc3339())
        .bind(signal.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_signal(&self, id: &str) -> Result<Option<Signal>> {
        let row = sqlx::query("SELECT * FROM signals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_signal(&r)).transpose()
    }

    async fn read_active_signals(&self, filter: &ActiveFilter) -> Result<Vec<Signal>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM signals
            WHERE state IN ('active', 'partially_closed')
              AND probability >= ?
              AND risk_reward_ratio >= ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(i64::from(filter.min_probability))
        .bind(filter.min_risk_reward)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_signal).collect()
    }

    async fn update_stop_loss(&self, id: &str, stop_loss: f64) -> Result<()> {
        sqlx::query("UPDATE signals SET stop_loss = ? WHERE id = ?")
            .bind(stop_loss)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_close_percent(
        &self,
        id: &str,
        close_percent: u8,
        state: SignalState,
    ) -> Result<()> {
        sqlx::query("UPDATE signals SET close_percent = ?, state = ? WHERE id = ?")
            .bind(i64::from(close_percent))
            .bind(state.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_state(
        &self,
        id: &str,
        state: SignalState,
        close_price: Option<f64>,
        outcome: Option<SignalOutcome>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE signals
            SET state = ?,
                close_price = COALESCE(?, close_price),
                outcome = COALESCE(?, outcome)
            WHERE id = ?
            "#,
        )
        .bind(state.to_string())
        .bind(close_price)
        .bind(outcome.map(|o| o.to_string()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_outcome(&self, outcome: &OutcomeRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO outcomes (signal_id, result, reached_price, close_reason, verified_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&outcome.signal_id)
        .bind(outcome.result.to_string())
        .bind(outcome.reached_price)
        .bind(outcome.close_reason.to_string())
        .bind(outcome.verified_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.as_database_error().is_some_and(|d| d.is_unique_violation()) => {
                Err(Error::OutcomeConflict(outcome.signal_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn has_recent_signal(&self, direction: Direction, since: DateTime<Utc>) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM signals
            WHERE direction = ?
              AND state IN ('active', 'partially_closed')
              AND created_at >= ?
            "#,
        )
        .bind(direction.to_string())
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("n")? > 0)
    }

    async fn read_score_buckets(&self) -> Result<Vec<ScoreBucket>> {
        let rows = sqlx::query("SELECT * FROM score_buckets ORDER BY min_score ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_bucket).collect()
    }

    async fn bucket_for_score(&self, score: u32) -> Result<Option<ScoreBucket>> {
        let row = sqlx::query("SELECT * FROM score_buckets WHERE min_score <= ? AND max_score > ?")
            .bind(i64::from(score))
            .bind(i64::from(score))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_bucket(&r)).transpose()
    }

    async fn update_bucket_stats(
        &self,
        id: i64,
        total: u32,
        wins: u32,
        losses: u32,
        hit_rate: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE score_buckets
            SET total_signals = ?, wins = ?, losses = ?, hit_rate = ?
            WHERE id = ?
            "#,
        )
        .bind(i64::from(total))
        .bind(i64::from(wins))
        .bind(i64::from(losses))
        .bind(hit_rate)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_adjusted_probability(&self, id: i64, probability: u8) -> Result<()> {
        sqlx::query("UPDATE score_buckets SET adjusted_probability = ? WHERE id = ?")
            .bind(i64::from(probability))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn outcome_stats_for_range(
        &self,
        min_score: u32,
        max_score: u32,
    ) -> Result<OutcomeStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN o.result = 'win' THEN 1 ELSE 0 END), 0) AS wins,
                   COALESCE(SUM(CASE WHEN o.result = 'loss' THEN 1 ELSE 0 END), 0) AS losses
            FROM outcomes o
            JOIN signals s ON s.id = o.signal_id
            WHERE s.score >= ? AND s.score < ?
            "#,
        )
        .bind(i64::from(min_score))
        .bind(i64::from(max_score))
        .fetch_one(&self.pool)
        .await?;

        Ok(OutcomeStats {
            total: row.try_get::<i64, _>("total")? as u32,
            wins: row.try_get::<i64, _>("wins")? as u32,
            losses: row.try_get::<i64, _>("losses")? as u32,
        })
    }

    async fn append_event(&self, event: &SignalEvent) -> Result<()> {
        sqlx::query("INSERT INTO signal_events (signal_id, at, kind, detail) VALUES (?, ?, ?, ?)")
            .bind(&event.signal_id)
            .bind(event.at.to_rfc3339())
            .bind(event.kind.to_string())
            .bind(&event.detail)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn read_events(&self, signal_id: &str) -> Result<Vec<SignalEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM signal_events WHERE signal_id = ? ORDER BY id ASC",
        )
        .bind(signal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(SignalEvent {
                    signal_id: row.try_get("signal_id")?,
                    at: parse_timestamp(&row.try_get::<String, _>("at")?)?,
                    kind: parse_field::<EventKind>(&row.try_get::<String, _>("kind")?)?,
                    detail: row.try_get("detail")?,
                })
            })
            .collect()
    }
}

// ─── Row mapping ──────────────────────────────────────────────────────────────

fn row_to_signal(row: &SqliteRow) -> Result<Signal> {
    Ok(Signal {
        id: row.try_get("id")?,
        direction: parse_field::<Direction>(&row.try_get::<String, _>("direction")?)?,
        entry_price: row.try_get("entry_price")?,
        stop_loss: row.try_get("stop_loss")?,
        take_profit_1: row.try_get("take_profit_1")?,
        take_profit_2: row.try_get("take_profit_2")?,
        take_profit_3: row.try_get("take_profit_3")?,
        probability: row.try_get::<i64, _>("probability")? as u8,
        risk_reward_ratio: row.try_get("risk_reward_ratio")?,
        reason: row.try_get("reason")?,
        timeframe: parse_field::<Timeframe>(&row.try_get::<String, _>("timeframe")?)?,
        score: row.try_get::<i64, _>("score")? as u32,
        state: parse_field::<SignalState>(&row.try_get::<String, _>("state")?)?,
        close_percent: row.try_get::<i64, _>("close_percent")? as u8,
        close_price: row.try_get("close_price")?,
        outcome: row
            .try_get::<Option<String>, _>("outcome")?
            .map(|s| parse_field::<SignalOutcome>(&s))
            .transpose()?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        expires_at: parse_timestamp(&row.try_get::<String, _>("expires_at")?)?,
    })
}

fn row_to_bucket(row: &SqliteRow) -> Result<ScoreBucket> {
    Ok(ScoreBucket {
        id: row.try_get("id")?,
        min_score: row.try_get::<i64, _>("min_score")? as u32,
        max_score: row.try_get::<i64, _>("max_score")? as u32,
        total_signals: row.try_get::<i64, _>("total_signals")? as u32,
        wins: row.try_get::<i64, _>("wins")? as u32,
        losses: row.try_get::<i64, _>("losses")? as u32,
        hit_rate: row.try_get("hit_rate")?,
        adjusted_probability: row.try_get::<i64, _>("adjusted_probability")? as u8,
    })
}

fn parse_field<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(Error::Other)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad timestamp '{value}': {e}")))
}
