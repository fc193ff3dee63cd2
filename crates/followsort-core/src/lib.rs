//! Core domain + application logic for followsort.
//!
//! This crate is framework-agnostic. The follow platform (Bilibili) and the
//! classifier model (OpenAI-compatible chat) live behind ports (traits)
//! implemented in adapter crates.

pub mod aggregate;
pub mod assign;
pub mod classify;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod pipeline;
pub mod ports;
pub mod progress;
pub mod resolve;
pub mod retrieve;
pub mod throttle;
pub mod throttled;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
