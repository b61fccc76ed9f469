//! Generation job lifecycle and state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::error::CoreError;
use crate::request::GenerationRequest;
use crate::types::JobId;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
    Rejected,
    Cancelled,
}

impl JobStatus {
    /// Statuses reachable from `self`. Terminal states return an empty slice.
    pub fn valid_transitions(self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            // Failed covers upload/submit errors before the backend accepted the job.
            Pending => &[Submitted, Rejected, Cancelled, Failed],
            Submitted => &[Polling, Failed],
            Polling => &[Completed, Failed, TimedOut],
            Completed | Failed | TimedOut | Rejected | Cancelled => &[],
        }
    }

    pub fn can_transition(self, to: JobStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn validate_transition(self, to: JobStatus) -> Result<(), CoreError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Invalid job transition: {self} -> {to}"
            )))
        }
    }

    pub fn is_terminal(self) -> bool {
        self.valid_transitions().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A request moving through the pipeline. The artifact, once attached, is
/// moved out to the caller with [`Job::take_artifact`].
#[derive(Debug)]
pub struct Job {
    pub request: GenerationRequest,
    status: JobStatus,
    prompt_id: Option<String>,
    artifact: Option<Artifact>,
}

impl Job {
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            request,
            status: JobStatus::Pending,
            prompt_id: None,
            artifact: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.request.job_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn prompt_id(&self) -> Option<&str> {
        self.prompt_id.as_deref()
    }

    pub fn transition(&mut self, to: JobStatus) -> Result<(), CoreError> {
        self.status.validate_transition(to)?;
        self.status = to;
        Ok(())
    }

    /// `Pending -> Submitted`, remembering the backend's prompt id.
    pub fn mark_submitted(&mut self, prompt_id: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobStatus::Submitted)?;
        self.prompt_id = Some(prompt_id.into());
        Ok(())
    }

    /// `Polling -> Completed` with the fetched artifact.
    pub fn complete(&mut self, artifact: Artifact) -> Result<(), CoreError> {
        if artifact.job_id != self.id() {
            return Err(CoreError::Conflict(format!(
                "Artifact for job {} attached to job {}",
                artifact.job_id,
                self.id()
            )));
        }
        self.transition(JobStatus::Completed)?;
        self.artifact = Some(artifact);
        Ok(())
    }

    pub fn take_artifact(&mut self) -> Option<Artifact> {
        self.artifact.take()
    }
}
