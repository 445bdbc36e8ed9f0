//! Library crate for tabletop-sync: the board synchronisation core shared by the relay
//! server, the headless board client and integration tests.

/// Relay and client configuration.
pub mod config;
/// Board storage backends.
pub mod dao;
mod dto;
mod error;
/// Relay HTTP routes.
pub mod routes;
mod services;
/// Board model, combat rules and the observable board store.
pub mod state;
/// Client-side synchronisation: codec, merge rules, writer, poller and session.
pub mod sync;
