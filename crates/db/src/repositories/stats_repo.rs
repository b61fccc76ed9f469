//! Repository for the `user_stats` and `recorded_jobs` tables.

use sqlx::SqlitePool;

use comfybot_core::types::{GuildId, UserId};

use crate::models::stats::{CompletionRecord, RecordOutcome, UserStats, UserStatsRow};

/// Column list for `user_stats` queries.
const COLUMNS: &str = "\
    guild_id, user_id, username, images, canvas_contributions, depth_maps, \
    total_time_secs, last_generated_ms";

/// Provides query operations for usage statistics.
pub struct StatsRepo;

impl StatsRepo {
    // ── Mutations ────────────────────────────────────────────────────

    /// Add one completed job's contribution to the counters.
    ///
    /// The job id is claimed in `recorded_jobs` within the same
    /// transaction, so redelivery of the same completion is a no-op that
    /// returns [`RecordOutcome::Duplicate`].
    pub async fn record_completion(
        pool: &SqlitePool,
        record: &CompletionRecord,
    ) -> Result<RecordOutcome, sqlx::Error> {
        let completed_ms = record.completed_at.timestamp_millis();
        let mut tx = pool.begin().await?;

        let claimed = sqlx::query(
            "INSERT OR IGNORE INTO recorded_jobs (job_id, guild_id, user_id, recorded_at_ms) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(record.job_id.to_string())
        .bind(record.guild_id as i64)
        .bind(record.user_id as i64)
        .bind(completed_ms)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await?;
            return Ok(RecordOutcome::Duplicate);
        }

        sqlx::query(
            "INSERT INTO user_stats \
                 (guild_id, user_id, username, images, canvas_contributions, depth_maps, \
                  total_time_secs, last_generated_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT (guild_id, user_id) DO UPDATE SET \
                 username = excluded.username, \
                 images = images + excluded.images, \
                 canvas_contributions = canvas_contributions + excluded.canvas_contributions, \
                 depth_maps = depth_maps + excluded.depth_maps, \
                 total_time_secs = total_time_secs + excluded.total_time_secs, \
                 last_generated_ms = MAX(COALESCE(last_generated_ms, 0), excluded.last_generated_ms)",
        )
        .bind(record.guild_id as i64)
        .bind(record.user_id as i64)
        .bind(&record.username)
        .bind(i64::from(record.images))
        .bind(i64::from(record.canvas_contributions))
        .bind(i64::from(record.depth_maps))
        .bind(record.duration_secs.max(0.0))
        .bind(completed_ms)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RecordOutcome::Recorded)
    }

    /// Delete one user's counters in a guild. Returns whether a row existed.
    pub async fn reset_user(
        pool: &SqlitePool,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM user_stats WHERE guild_id = ?1 AND user_id = ?2")
            .bind(guild_id as i64)
            .bind(user_id as i64)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every user's counters in a guild. Returns the number removed.
    pub async fn reset_guild(pool: &SqlitePool, guild_id: GuildId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM user_stats WHERE guild_id = ?1")
            .bind(guild_id as i64)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Counters for one user in one guild.
    pub async fn find(
        pool: &SqlitePool,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<UserStats>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM user_stats WHERE guild_id = ?1 AND user_id = ?2");
        let row = sqlx::query_as::<_, UserStatsRow>(&query)
            .bind(guild_id as i64)
            .bind(user_id as i64)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(UserStats::from))
    }

    /// Top `limit` users by image count. Ties go to whoever reached the
    /// count first (earliest last generation).
    pub async fn leaderboard(
        pool: &SqlitePool,
        guild_id: GuildId,
        limit: u32,
    ) -> Result<Vec<UserStats>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM user_stats \
             WHERE guild_id = ?1 \
             ORDER BY images DESC, last_generated_ms ASC, user_id ASC \
             LIMIT ?2"
        );
        let rows = sqlx::query_as::<_, UserStatsRow>(&query)
            .bind(guild_id as i64)
            .bind(i64::from(limit))
            .fetch_all(pool)
            .await?;
        Ok(rows.into_iter().map(UserStats::from).collect())
    }

    /// Whether a job id has already been counted.
    pub async fn is_recorded(pool: &SqlitePool, job_id: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT job_id FROM recorded_jobs WHERE job_id = ?1")
                .bind(job_id)
                .fetch_optional(pool)
                .await?;
        Ok(row.is_some())
    }
}
