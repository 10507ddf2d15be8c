//! Data model shared across the agent

pub mod action;
pub mod appspec;
pub mod healthcheck;
pub mod report;
pub mod service;
