//! Admission controller.
//!
//! Wraps the pure rules in [`comfybot_core::admission`] with the I/O they
//! need: decoding supplied image headers and asking a backend for its
//! `/system_stats`. Static limits are checked before a job is queued; the
//! resource check runs again once a slot is held, right before submission.

use comfybot_comfyui::backend::GenerationBackend;
use comfybot_core::admission::{self, Admission, Demand};
use comfybot_core::artifact::image_dimensions;
use comfybot_core::error::GenerationError;
use comfybot_core::request::GenerationRequest;
use comfybot_core::settings::GenerationLimits;

use crate::templates::ResolvedSettings;

pub struct AdmissionController {
    limits: GenerationLimits,
}

impl AdmissionController {
    pub fn new(limits: GenerationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &GenerationLimits {
        &self.limits
    }

    /// What `request` will ask of a backend once parameterized.
    ///
    /// Only text-to-image and animation pick their own output size; the
    /// other commands inherit it from the supplied image.
    pub fn demand(
        request: &GenerationRequest,
        settings: &ResolvedSettings,
    ) -> Result<Demand, GenerationError> {
        let chooses_size = request.kind.chooses_size();
        let source_dims = request
            .source_image
            .as_deref()
            .map(image_dimensions)
            .transpose()
            .map_err(|e| GenerationError::Parameter(format!("Source image: {e}")))?;
        let mask_dims = request
            .mask_image
            .as_deref()
            .map(image_dimensions)
            .transpose()
            .map_err(|e| GenerationError::Parameter(format!("Mask image: {e}")))?;

        Ok(Demand {
            width: chooses_size.then_some(settings.width),
            height: chooses_size.then_some(settings.height),
            batch_size: if chooses_size { settings.batch_size } else { 1 },
            source_dims,
            mask_dims,
        })
    }

    /// Limits that need no backend round trip.
    pub fn check_static(&self, demand: &Demand) -> Result<(), GenerationError> {
        into_result(admission::check_limits(&self.limits, demand))
    }

    /// Read `backend` resources and check its VRAM headroom.
    pub async fn check_backend(&self, backend: &dyn GenerationBackend) -> Result<(), GenerationError> {
        let decision = match backend.system_stats().await {
            Ok(stats) => admission::check_resources(&self.limits, Ok(&stats.to_snapshot())),
            Err(e) => {
                tracing::warn!(
                    backend = backend.name(),
                    error = %e,
                    policy = ?self.limits.check_policy,
                    "Resource check failed",
                );
                admission::check_resources(&self.limits, Err(&e.to_string()))
            }
        };
        into_result(decision)
    }
}

fn into_result(decision: Admission) -> Result<(), GenerationError> {
    match decision {
        Admission::Allow => Ok(()),
        Admission::Reject(reason) => Err(GenerationError::AdmissionRejected(reason)),
    }
}
