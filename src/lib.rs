//! annil-server service module
//!
//! Turns one declarative [`Configuration`] into the settings file, systemd
//! unit and account rules that run annil-server as a hardened system service,
//! and optionally applies them to the host.

pub mod config;
pub mod host;
pub mod module;

pub use config::{Configuration, PackageRef};
pub use host::{ApplyReport, FileChange, Host, InstallerError};
pub use module::{Artifacts, GenerateError, GeneratorOptions, generate};
