//! # device-selection
//!
//! The service around `device-selection-core`: upstream clients, the
//! invalidating cache, the catalog snapshot, the HTTP API and the CLI.

pub mod api;
pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod invalidation;
pub mod upstream;
