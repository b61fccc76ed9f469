//! ComfyUI REST client library.
//!
//! Provides typed payloads for the history, queue and system-stats
//! endpoints, the [`backend::GenerationBackend`] seam the pipeline talks
//! to, and the bounded backoff loop that waits for a prompt to finish.

pub mod api;
pub mod backend;
pub mod messages;
pub mod poller;
