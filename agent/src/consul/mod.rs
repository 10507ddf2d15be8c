//! Coordination store access

pub mod client;
pub mod keys;
pub mod kv;
pub mod memory;
