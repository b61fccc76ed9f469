//! Generation job orchestration.
//!
//! Turns a validated [`GenerationRequest`](comfybot_core::request::GenerationRequest)
//! into backend work and a delivered result:
//!
//! 1. [`templates`]: look up the workflow template and parameterize a copy.
//! 2. [`admission`]: static limits, then a VRAM check once a slot is held.
//! 3. [`queue`]: bounded, fair slots per backend with cancellable tickets.
//! 4. [`runner`]: upload, submit, poll and fetch the artifact.
//! 5. [`orchestrator`]: ties the steps together, persists outputs and
//!    stats, and publishes exactly one terminal event per job.
//!
//! Shared canvas mutations live in [`canvas`].

pub mod admission;
pub mod canvas;
pub mod orchestrator;
pub mod queue;
pub mod runner;
pub mod templates;

pub use orchestrator::{GenerationOutcome, Orchestrator, OrchestratorConfig, OrchestratorParts, SavedImage};
