//! Polling list synchronization for the mail-processing operator console.
//!
//! `sync` holds the engine (query state, fetch sessions, list controllers),
//! `api` the backend record types and one-shot calls, and `transport` the
//! HTTP seam both are built on.

pub mod api;
pub mod cli;
pub mod config;
pub mod log;
pub mod sync;
pub mod transport;
