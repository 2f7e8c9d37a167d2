//! Test utilities for the CSM load tests and their clients.
//!
//! This crate provides utilities to facilitate testing of the user state clients and the load
//! model. See the modules for all available utilities.

pub mod client;
pub mod server;
pub mod tracing;
