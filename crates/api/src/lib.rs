//! Comfybot HTTP server library.
//!
//! Exposes config, state, error handling, the router and startup wiring so
//! integration tests and the binary entrypoint share them.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod router;
pub mod routes;
pub mod startup;
pub mod state;
