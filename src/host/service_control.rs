//! Systemd service control and host command execution.
//!
//! State queries (`is-enabled`, `is-active`, `NeedDaemonReload`) let an apply
//! finish work that an earlier, interrupted apply left undone.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::debug;

use super::InstallerError;

/// Locates and runs host tools, from `PATH` or an explicit search path.
#[derive(Debug, Clone, Default)]
pub(super) struct Tools {
    search_path: Option<OsString>,
}

impl Tools {
    pub(super) fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    fn locate(&self, program: &str) -> Result<PathBuf, InstallerError> {
        let found = match &self.search_path {
            Some(paths) => which::which_in(program, Some(paths), Path::new("/")),
            None => which::which(program),
        };
        found.map_err(|e| InstallerError::System(format!("Failed to locate {}: {}", program, e)))
    }

    fn output(&self, program: &str, args: &[&str]) -> Result<Output, InstallerError> {
        let resolved = self.locate(program)?;
        debug!("Running {} {}", resolved.display(), args.join(" "));

        Command::new(&resolved).args(args).output().map_err(|e| {
            InstallerError::System(format!("Failed to execute {}: {}", program, e))
        })
    }

    /// Run a host tool, failing with its stderr if it exits non-zero.
    pub(super) fn run(&self, program: &str, args: &[&str]) -> Result<(), InstallerError> {
        let output = self.output(program, args)?;

        if !output.status.success() {
            return Err(InstallerError::System(format!(
                "{} {} failed: {}",
                program,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }

    /// Exit status of a query command; only a failure to spawn is an error.
    fn check(&self, program: &str, args: &[&str]) -> Result<bool, InstallerError> {
        Ok(self.output(program, args)?.status.success())
    }

    /// Reload systemd daemon to pick up changes
    pub(super) fn reload_systemd_daemon(&self) -> Result<(), InstallerError> {
        self.run("systemctl", &["daemon-reload"])
    }

    /// Enable the unit for boot
    pub(super) fn enable_systemd_service(&self, unit_file: &str) -> Result<(), InstallerError> {
        self.run("systemctl", &["enable", unit_file])
    }

    /// Restart (or start) the unit so it picks up new settings
    pub(super) fn restart_systemd_service(&self, unit_file: &str) -> Result<(), InstallerError> {
        self.run("systemctl", &["restart", unit_file])
    }

    /// Stop the unit and disable it in one step
    pub(super) fn disable_systemd_service_now(&self, unit_file: &str) -> Result<(), InstallerError> {
        self.run("systemctl", &["disable", "--now", unit_file])
    }

    pub(super) fn is_enabled(&self, unit_file: &str) -> Result<bool, InstallerError> {
        self.check("systemctl", &["is-enabled", "--quiet", unit_file])
    }

    pub(super) fn is_active(&self, unit_file: &str) -> Result<bool, InstallerError> {
        self.check("systemctl", &["is-active", "--quiet", unit_file])
    }

    /// Whether systemd still holds an older copy of the unit file.
    pub(super) fn needs_daemon_reload(&self, unit_file: &str) -> Result<bool, InstallerError> {
        let output = self.output(
            "systemctl",
            &["show", "--property=NeedDaemonReload", "--value", unit_file],
        )?;
        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "yes")
    }
}
