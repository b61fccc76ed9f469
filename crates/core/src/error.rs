use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome taxonomy for a generation job that did not complete.
///
/// Validation and admission variants are produced before any backend
/// capacity is consumed. The backend variants are produced after the job
/// was submitted and are delivered through the same channel as success.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    /// Bad user input. The message is safe to show to the requester verbatim.
    #[error("{0}")]
    Parameter(String),

    /// Misconfiguration: missing template or unresolvable slot.
    #[error("Workflow template error: {0}")]
    Template(String),

    /// Resource or limit rejection. Retrying unchanged will not help.
    #[error("Request rejected: {0}")]
    AdmissionRejected(String),

    /// Network or backend failure after bounded retries. Safe to retry later.
    #[error("Generation backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend did not finish the job within the configured timeout.
    #[error("Job {job_id} timed out after {timeout_secs}s")]
    TimedOut { job_id: JobId, timeout_secs: u64 },

    /// The backend reported success but the output could not be retrieved.
    #[error("Job {job_id} completed but its output is missing: {detail}")]
    ArtifactMissing { job_id: JobId, detail: String },

    /// The backend executed the job and reported an execution error.
    #[error("Generation failed: {0}")]
    Failed(String),

    /// Another unfinished or already recorded job has this id.
    #[error("Job {0} already exists")]
    DuplicateJob(JobId),

    /// The requester withdrew the job while it was still queued.
    #[error("Job {0} was cancelled before submission")]
    Cancelled(JobId),

    /// Local persistence (stats, canvas, output files) failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl GenerationError {
    /// Stable machine-readable code used in API responses and events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parameter(_) => "PARAMETER_ERROR",
            Self::Template(_) => "TEMPLATE_ERROR",
            Self::AdmissionRejected(_) => "ADMISSION_REJECTED",
            Self::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Self::TimedOut { .. } => "TIMED_OUT",
            Self::ArtifactMissing { .. } => "ARTIFACT_MISSING",
            Self::Failed(_) => "GENERATION_FAILED",
            Self::Cancelled(_) => "CANCELLED",
            Self::DuplicateJob(_) => "DUPLICATE_JOB",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Whether the requester may retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::TimedOut { .. })
    }
}

impl From<CoreError> for GenerationError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::Parameter(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}
