//! Concrete pipeline stages

pub mod bundle;
pub mod cleanup;
pub mod consul;
pub mod disk_space;
pub mod files;
pub mod healthchecks;
pub mod hooks;
pub mod validate;

pub use bundle::DownloadBundle;
pub use cleanup::DeletePreviousDeploymentFiles;
pub use consul::{DeregisterFromConsul, RegisterWithConsul};
pub use disk_space::CheckDiskSpace;
pub use files::{ApplyPermissions, CopyFiles};
pub use healthchecks::{DeregisterOldHealthChecks, RegisterHealthChecks};
pub use hooks::{LifecycleHook, StopApplication};
pub use validate::{ValidateBundle, ValidateDeployment};
