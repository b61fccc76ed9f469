//! Job status event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`]: one lifecycle change of a generation job.

pub mod bus;

pub use bus::{EventBus, JobEvent, JobEventKind};
