//! Applies account rules with shadow-utils.
//!
//! Existing accounts are never modified, so a re-run converges to a no-op.

use log::{debug, info, warn};
use nix::unistd::{Group, User};

use crate::module::{GroupRule, UserRule};

use super::InstallerError;
use super::service_control::Tools;

fn group_exists(name: &str) -> Result<bool, InstallerError> {
    Group::from_name(name)
        .map(|g| g.is_some())
        .map_err(|e| InstallerError::System(format!("Failed to look up group {}: {}", name, e)))
}

fn user_exists(name: &str) -> Result<bool, InstallerError> {
    User::from_name(name)
        .map(|u| u.is_some())
        .map_err(|e| InstallerError::System(format!("Failed to look up user {}: {}", name, e)))
}

/// Create the group unless it exists. Returns whether it was created.
pub(super) fn ensure_group(tools: &Tools, rule: &GroupRule) -> Result<bool, InstallerError> {
    if group_exists(&rule.name)? {
        debug!("Group {} already exists", rule.name);
        return Ok(false);
    }

    tools.run("groupadd", &["--system", &rule.name])?;
    info!("Created group {}", rule.name);
    Ok(true)
}

/// Create the user unless it exists. Returns whether it was created.
///
/// Supplementary groups missing on this host are skipped with a warning,
/// since `useradd` refuses unknown groups.
pub(super) fn ensure_user(tools: &Tools, rule: &UserRule) -> Result<bool, InstallerError> {
    if user_exists(&rule.name)? {
        debug!("User {} already exists", rule.name);
        return Ok(false);
    }

    let mut extra_groups = Vec::with_capacity(rule.extra_groups.len());
    for group in &rule.extra_groups {
        if group_exists(group)? {
            extra_groups.push(group.as_str());
        } else {
            warn!(
                "Group {} not present, {} will not be a member",
                group, rule.name
            );
        }
    }
    let extra_groups = extra_groups.join(",");
    let home = rule.home.to_string_lossy().into_owned();
    let shell = which::which("nologin")
        .ok()
        .map(|p| p.to_string_lossy().into_owned());

    let mut args: Vec<&str> = Vec::new();
    if rule.system {
        args.push("--system");
    }
    args.extend([
        "--home-dir",
        home.as_str(),
        "--no-create-home",
        "--gid",
        rule.group.as_str(),
    ]);
    if !extra_groups.is_empty() {
        args.extend(["--groups", extra_groups.as_str()]);
    }
    if let Some(shell) = shell.as_deref() {
        args.extend(["--shell", shell]);
    }
    args.push(&rule.name);

    tools.run("useradd", &args)?;
    info!("Created user {}", rule.name);
    Ok(true)
}
