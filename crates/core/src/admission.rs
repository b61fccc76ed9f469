//! Admission rules: static request limits and backend resource headroom.
//!
//! The rules are pure. The pipeline gathers the [`Demand`] from a request
//! and a [`ResourceSnapshot`] from the backend, then asks [`evaluate`].

use serde::{Deserialize, Serialize};

use crate::settings::{GenerationLimits, ResourceCheckPolicy};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// What a job will ask of the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Demand {
    /// Requested output size, for commands that choose one.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub batch_size: u32,
    /// Dimensions of supplied images.
    pub source_dims: Option<(u32, u32)>,
    pub mask_dims: Option<(u32, u32)>,
}

/// One GPU as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuDevice {
    pub name: String,
    pub vram_total: u64,
    pub vram_free: u64,
}

impl GpuDevice {
    pub fn vram_used_gb(&self) -> f64 {
        self.vram_total.saturating_sub(self.vram_free) as f64 / BYTES_PER_GB
    }
}

/// Point-in-time backend resource report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub devices: Vec<GpuDevice>,
}

/// Admission decision. The reason is user-facing.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Allow,
    Reject(String),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Static checks that need no backend round trip.
pub fn check_limits(limits: &GenerationLimits, demand: &Demand) -> Admission {
    let max_dim = limits.max_image_dimension;

    if let (Some(w), Some(h)) = (demand.width, demand.height) {
        if w > max_dim || h > max_dim {
            return Admission::Reject(format!(
                "Requested size {w}x{h} exceeds the maximum dimension of {max_dim}px"
            ));
        }
        let area = u64::from(w) * u64::from(h);
        if area > limits.max_image_pixels {
            return Admission::Reject(format!(
                "Requested size {w}x{h} ({area} pixels) exceeds the limit of {} pixels",
                limits.max_image_pixels
            ));
        }
    }

    for (label, dims) in [("Source image", demand.source_dims), ("Mask image", demand.mask_dims)] {
        if let Some((w, h)) = dims {
            if w > max_dim || h > max_dim {
                return Admission::Reject(format!(
                    "{label} is {w}x{h}; the maximum is {max_dim}x{max_dim}px"
                ));
            }
        }
    }

    if demand.batch_size > limits.max_batch_size {
        return Admission::Reject(format!(
            "Batch size {} exceeds the maximum of {}",
            demand.batch_size, limits.max_batch_size
        ));
    }

    Admission::Allow
}

/// Headroom check against a backend resource reading.
///
/// A backend with no GPU devices is admitted. A failed check is decided
/// by the configured [`ResourceCheckPolicy`].
pub fn check_resources(
    limits: &GenerationLimits,
    reading: Result<&ResourceSnapshot, &str>,
) -> Admission {
    let snapshot = match reading {
        Ok(snapshot) => snapshot,
        Err(reason) => {
            return match limits.check_policy {
                ResourceCheckPolicy::FailOpen => Admission::Allow,
                ResourceCheckPolicy::FailClosed => Admission::Reject(format!(
                    "Backend resource check failed ({reason}). Try again later."
                )),
            };
        }
    };

    let busiest = snapshot
        .devices
        .iter()
        .map(GpuDevice::vram_used_gb)
        .fold(None, |acc: Option<f64>, used| Some(acc.map_or(used, |a| a.max(used))));

    match busiest {
        Some(used) if used > limits.vram_threshold_gb => Admission::Reject(format!(
            "GPU VRAM usage too high ({used:.1}GB in use, limit {:.1}GB). Try again later.",
            limits.vram_threshold_gb
        )),
        _ => Admission::Allow,
    }
}

/// Static limits first, then resources.
pub fn evaluate(
    limits: &GenerationLimits,
    demand: &Demand,
    reading: Result<&ResourceSnapshot, &str>,
) -> Admission {
    match check_limits(limits, demand) {
        Admission::Allow => check_resources(limits, reading),
        reject => reject,
    }
}
