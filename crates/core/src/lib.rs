//! Pure domain logic for the comfybot generation core.
//!
//! Nothing in this crate performs I/O. Requests, option parsing, admission
//! rules, the job state machine, model catalog and admin authorization all
//! live here so they can be tested in isolation.

pub mod admission;
pub mod artifact;
pub mod auth;
pub mod canvas;
pub mod catalog;
pub mod command;
pub mod error;
pub mod job;
pub mod options;
pub mod request;
pub mod settings;
pub mod types;
