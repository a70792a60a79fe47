//! # Tandem Library
//!
//! Library facade of the Tandem binary, exposing the HTTP API, the pull-side
//! inlet host and the experiment coordinator for integration tests.

pub mod api;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod host;
pub mod registrar;
pub mod sim;
