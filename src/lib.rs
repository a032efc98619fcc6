//! stockleague: fantasy stock league season engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod clock;
pub mod config;
pub mod season;
pub mod storage;
pub mod types;
pub mod valuation;
