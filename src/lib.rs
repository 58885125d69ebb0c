//! Core library for the coin-feed project.
//!
//! Keeps a single WebSocket connection to a streaming price feed alive and
//! publishes the most recent bitcoin price to subscribers.

pub mod config;
pub mod errors;
pub mod feed;
pub mod models;
pub mod utils;
