//! CALIGULAND: social prediction-market game server
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod market;
pub mod oracle;
pub mod reputation;
pub mod chain;
pub mod engine;
pub mod gateway;
pub mod server;
