//! Integration tests for cdagent

mod test_converge;
mod test_healthchecks;
mod test_memory;
mod test_pipeline;
mod test_script;
mod test_stages;
