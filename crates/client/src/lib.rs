//! Client side of long-running backend jobs.
//!
//! Submits jobs over REST, then tracks each one through a status poll
//! and a WebSocket push channel at the same time, reconciling both into
//! a single view. Also fetches the final result and offers copy,
//! download and share actions on it.

pub mod affordances;
pub mod api;
pub mod client;
pub mod config;
pub mod events;
pub mod initiator;
pub mod messages;
pub mod observer;
mod processor;
pub mod reconcile;
pub mod reconnect;
pub mod renderer;

