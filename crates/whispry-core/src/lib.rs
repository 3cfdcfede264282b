//! Core of the Whispry chat client: conversation sync engine + domain.
//!
//! This crate is intentionally transport-agnostic. REST and the push socket
//! live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod dedup;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod message;
pub mod ports;
pub mod session;
pub mod utils;

pub use errors::{Error, Result};
