//! Core of the reddit -> IRC relay.
//!
//! This crate is intentionally framework-agnostic. The reddit HTTP API and the
//! IRC connection live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod dedup;
pub mod delivery;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod ids;
pub mod logging;
pub mod nickname;
pub mod poller;
pub mod ports;
pub mod session;
pub mod supervisor;
pub mod token;
pub mod transport;

pub use errors::{Error, Result};
