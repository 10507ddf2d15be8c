//! cdagent Library
//!
//! Core modules for the host deployment agent.

pub mod app;
pub mod artifacts;
pub mod consul;
pub mod converge;
pub mod deploy;
pub mod diagnostics;
pub mod environment;
pub mod errors;
pub mod filesys;
pub mod healthchecks;
pub mod logs;
pub mod models;
pub mod storage;
pub mod utils;
pub mod workers;
