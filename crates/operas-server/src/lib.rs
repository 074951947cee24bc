//! # operas-server
//!
//! HTTP server library for the operas museum beacon simulator.
//!
//! Provides the API handlers, application state and logging setup used by the
//! `operas-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
