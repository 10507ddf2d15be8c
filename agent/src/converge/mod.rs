//! Desired state resolution and the convergence pass

pub mod converger;
pub mod loader;
pub mod quarantine;
pub mod server_role;
