//! Usage statistics models.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use comfybot_core::types::{GuildId, JobId, Timestamp, UserId};

/// Raw `user_stats` row. Snowflakes are stored as signed 64-bit integers.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct UserStatsRow {
    pub guild_id: i64,
    pub user_id: i64,
    pub username: String,
    pub images: i64,
    pub canvas_contributions: i64,
    pub depth_maps: i64,
    pub total_time_secs: f64,
    pub last_generated_ms: Option<i64>,
}

/// Usage counters for one user in one guild.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStats {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub username: String,
    pub images: u64,
    pub canvas_contributions: u64,
    pub depth_maps: u64,
    pub total_time_secs: f64,
    pub last_generated: Option<Timestamp>,
}

impl From<UserStatsRow> for UserStats {
    fn from(row: UserStatsRow) -> Self {
        Self {
            guild_id: row.guild_id as GuildId,
            user_id: row.user_id as UserId,
            username: row.username,
            images: row.images.max(0) as u64,
            canvas_contributions: row.canvas_contributions.max(0) as u64,
            depth_maps: row.depth_maps.max(0) as u64,
            total_time_secs: row.total_time_secs,
            last_generated: row
                .last_generated_ms
                .and_then(DateTime::<Utc>::from_timestamp_millis),
        }
    }
}

/// Increments contributed by one completed job.
#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub job_id: JobId,
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub username: String,
    pub images: u32,
    pub canvas_contributions: u32,
    pub depth_maps: u32,
    pub duration_secs: f64,
    pub completed_at: Timestamp,
}

/// Whether a completion changed the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// The job id was already counted; nothing changed.
    Duplicate,
}
