//! Deployment execution

pub mod deployment;
pub mod fsm;
pub mod pipeline;
pub mod report;
pub mod retention;
pub mod script;
pub mod stage;
pub mod stages;
