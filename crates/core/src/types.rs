/// Chat-platform user ids are 64-bit snowflakes.
pub type UserId = u64;

/// Chat-platform guild ids are 64-bit snowflakes.
pub type GuildId = u64;

/// Every generation job is identified by a UUID v7 (time ordered).
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Guild id used for commands issued in direct messages.
pub const DIRECT_MESSAGE_GUILD: GuildId = 0;

/// Allocate a fresh job id.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}
