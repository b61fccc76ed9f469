//! The seam between the pipeline and an execution backend.
//!
//! [`ComfyUIApi`] is the production implementation. Pipeline tests supply
//! an in-memory fake.

use async_trait::async_trait;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::messages::{OutputImage, PromptStatus, QueueSnapshot, SubmitResponse, SystemStats};

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Human-readable identity for logs (base URL for ComfyUI).
    fn name(&self) -> &str;

    async fn upload_image(&self, filename: &str, bytes: Vec<u8>) -> Result<String, ComfyUIApiError>;

    async fn submit(
        &self,
        graph: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError>;

    async fn prompt_status(&self, prompt_id: &str) -> Result<PromptStatus, ComfyUIApiError>;

    async fn fetch_output(&self, image: &OutputImage) -> Result<Vec<u8>, ComfyUIApiError>;

    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError>;

    /// Remove a prompt that has not started yet.
    async fn cancel(&self, prompt_id: &str) -> Result<(), ComfyUIApiError>;

    /// Stop whatever is executing right now.
    async fn interrupt(&self) -> Result<(), ComfyUIApiError>;

    async fn system_stats(&self) -> Result<SystemStats, ComfyUIApiError>;
}

#[async_trait]
impl GenerationBackend for ComfyUIApi {
    fn name(&self) -> &str {
        self.api_url()
    }

    async fn upload_image(&self, filename: &str, bytes: Vec<u8>) -> Result<String, ComfyUIApiError> {
        ComfyUIApi::upload_image(self, filename, bytes).await
    }

    async fn submit(
        &self,
        graph: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.submit_workflow(graph, client_id).await
    }

    async fn prompt_status(&self, prompt_id: &str) -> Result<PromptStatus, ComfyUIApiError> {
        ComfyUIApi::prompt_status(self, prompt_id).await
    }

    async fn fetch_output(&self, image: &OutputImage) -> Result<Vec<u8>, ComfyUIApiError> {
        self.view(image).await
    }

    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        self.get_queue().await
    }

    async fn cancel(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        self.cancel_execution(prompt_id).await
    }

    async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        ComfyUIApi::interrupt(self).await
    }

    async fn system_stats(&self) -> Result<SystemStats, ComfyUIApiError> {
        ComfyUIApi::system_stats(self).await
    }
}

/// What a best-effort cancellation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The prompt was executing and the backend was interrupted.
    Interrupted,
    /// The prompt was waiting and was deleted from the backend queue.
    Dequeued,
    /// The prompt was in neither list (already finished or unknown).
    NotFound,
    /// The backend could not be reached.
    Failed,
}

/// Stop `prompt_id` on `backend`: interrupt it if it is running,
/// otherwise delete it from the queue. Errors are logged, never returned.
pub async fn cancel_prompt(backend: &dyn GenerationBackend, prompt_id: &str) -> CancelOutcome {
    let queue = match backend.queue().await {
        Ok(queue) => queue,
        Err(e) => {
            tracing::warn!(backend = backend.name(), prompt_id, error = %e, "Queue lookup for cancellation failed");
            // Still try to drop it from the pending list.
            return match backend.cancel(prompt_id).await {
                Ok(()) => CancelOutcome::Dequeued,
                Err(_) => CancelOutcome::Failed,
            };
        }
    };

    let (outcome, result) = if queue.is_running(prompt_id) {
        (CancelOutcome::Interrupted, backend.interrupt().await)
    } else if queue.is_pending(prompt_id) {
        (CancelOutcome::Dequeued, backend.cancel(prompt_id).await)
    } else {
        return CancelOutcome::NotFound;
    };

    match result {
        Ok(()) => {
            tracing::info!(backend = backend.name(), prompt_id, ?outcome, "Cancelled prompt on backend");
            outcome
        }
        Err(e) => {
            tracing::warn!(backend = backend.name(), prompt_id, error = %e, "Backend cancellation failed");
            CancelOutcome::Failed
        }
    }
}
