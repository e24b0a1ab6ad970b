//! Systemd service unit derivation.
//!
//! The unit is a value first and a file second: [`build_unit`] fixes the
//! hardening and ordering policy, [`ServiceUnit::render`] produces the text
//! handed to systemd.

use std::path::Path;

use super::validate::ValidatedConfig;

pub const UNIT_NAME: &str = "annil-server";
const DESCRIPTION: &str = "Annil Server";

/// Process supervision descriptor for annil-server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub name: String,
    pub description: String,
    pub after: Vec<String>,
    pub wanted_by: Vec<String>,
    pub exec_start: String,
    pub capability_bounding_set: Vec<String>,
    pub ambient_capabilities: Vec<String>,
    pub no_new_privileges: bool,
    pub user: String,
    pub group: String,
}

/// Derive the service unit. Total for any validated configuration.
pub fn build_unit(config: &ValidatedConfig, settings_path: &Path) -> ServiceUnit {
    // Trusted inputs, concatenated as-is.
    let exec_start = format!(
        "{} --config {}",
        config.package.binary_path().display(),
        settings_path.display()
    );

    ServiceUnit {
        name: UNIT_NAME.to_string(),
        description: DESCRIPTION.to_string(),
        after: vec!["network.target".into(), "nss-lookup.target".into()],
        wanted_by: vec!["multi-user.target".into()],
        exec_start,
        capability_bounding_set: Vec::new(),
        ambient_capabilities: Vec::new(),
        no_new_privileges: true,
        user: config.user.clone(),
        group: config.group.clone(),
    }
}

impl ServiceUnit {
    /// File name of the unit, e.g. `annil-server.service`.
    pub fn file_name(&self) -> String {
        format!("{}.service", self.name)
    }

    /// Render the unit file.
    ///
    /// Empty capability lists render as bare `Key=` assignments, which reset
    /// the set to empty rather than leaving the systemd default in place.
    pub fn render(&self) -> String {
        let mut content = String::with_capacity(512);

        content.push_str("[Unit]\n");
        content.push_str(&format!("Description={}\n", self.description));
        if !self.after.is_empty() {
            content.push_str(&format!("After={}\n", self.after.join(" ")));
        }
        content.push('\n');

        content.push_str("[Service]\n");
        content.push_str(&format!("ExecStart={}\n", self.exec_start));
        content.push_str(&format!(
            "CapabilityBoundingSet={}\n",
            self.capability_bounding_set.join(" ")
        ));
        content.push_str(&format!(
            "AmbientCapabilities={}\n",
            self.ambient_capabilities.join(" ")
        ));
        content.push_str(&format!("NoNewPrivileges={}\n", self.no_new_privileges));
        content.push_str(&format!("User={}\n", self.user));
        content.push_str(&format!("Group={}\n", self.group));
        content.push('\n');

        content.push_str("[Install]\n");
        if !self.wanted_by.is_empty() {
            content.push_str(&format!("WantedBy={}\n", self.wanted_by.join(" ")));
        }

        content
    }

    /// Binary this unit runs, as named in the exec command.
    pub fn program(&self) -> &str {
        self.exec_start
            .split_once(" --config ")
            .map_or(self.exec_start.as_str(), |(program, _)| program)
    }
}
