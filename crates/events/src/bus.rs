//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`JobEvent`]s. It is
//! shared via `Arc<EventBus>` between the orchestrator and the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use comfybot_core::command::CommandKind;
use comfybot_core::types::{GuildId, JobId, UserId};

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobEventKind {
    /// Admitted and waiting for a backend slot.
    Queued { backend: usize, position: usize },
    /// Accepted by the backend.
    Submitted { prompt_id: String },
    Completed { images: usize, duration_ms: u64 },
    Failed { code: String, message: String },
    TimedOut { timeout_secs: u64 },
    Rejected { code: String, reason: String },
    Cancelled,
}

impl JobEventKind {
    /// Whether this is the last event the job will produce.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued { .. } | Self::Submitted { .. })
    }
}

/// One lifecycle change of a generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub command: CommandKind,
    #[serde(flatten)]
    pub kind: JobEventKind,
    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(
        job_id: JobId,
        user_id: UserId,
        guild_id: GuildId,
        command: CommandKind,
        kind: JobEventKind,
    ) -> Self {
        Self {
            job_id,
            user_id,
            guild_id,
            command,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Name used as the SSE `event:` field.
    pub fn event_name(&self) -> &'static str {
        match self.kind {
            JobEventKind::Queued { .. } => "job.queued",
            JobEventKind::Submitted { .. } => "job.submitted",
            JobEventKind::Completed { .. } => "job.completed",
            JobEventKind::Failed { .. } => "job.failed",
            JobEventKind::TimedOut { .. } => "job.timed_out",
            JobEventKind::Rejected { .. } => "job.rejected",
            JobEventKind::Cancelled => "job.cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`JobEvent`].
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: JobEvent) {
        tracing::trace!(job_id = %event.job_id, event = event.event_name(), "Publishing job event");
        // Ignore the SendError, it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
