//! Tradepipe
//!
//! Asynchronous order execution pipeline: order intents are durably
//! recorded, dispatched over a message broker, executed against the
//! exchange with per-user signed requests, and the outcomes are
//! persisted and fanned out live to every session of the submitting
//! user.

pub mod application;
pub mod auth;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod vault;
